fn main() {
    let code = match settle::run::run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("settle: error: {:#}", err);
            1
        }
    };
    std::process::exit(code);
}
