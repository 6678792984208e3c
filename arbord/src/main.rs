mod daemon;

#[macro_use]
extern crate log;

pub fn main() -> ! {
    env_logger::builder().parse_env("ARBOR_LOG").init();
    if let Err(err) = daemon::run(std::env::args_os()) {
        eprintln!("{}", err);
        std::process::exit(1)
    } else {
        std::process::exit(0)
    }
}
