fn main() {
    if let Err(e) = health_export::run() {
        log::error!("{}", e);
        eprintln!("health-export: {}", e);
        std::process::exit(1);
    }
}
