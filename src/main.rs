fn main() {
    if let Err(err) = modelview::run() {
        eprintln!("Application error: {err}");
    }
}
