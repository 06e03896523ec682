fn main() {
    use articlepack::logging::{init_logging, Verbosity};
    use clap::Parser;
    use std::error::Error;
    let args = articlepack::cli::Args::parse();
    init_logging(Verbosity::from_flags(args.quiet, args.verbose));
    if let Err(e) = articlepack::cli::run(&args) {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
