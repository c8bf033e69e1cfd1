fn main() {
    if let Err(err) = recon_managed::run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
