use std::path::PathBuf;

use clap::{arg, value_parser, ArgAction, Command};

pub struct DaemonArgs {
    pub config: Option<PathBuf>,
    pub port: Option<u16>,
    pub verbosity: u8,
}

fn interface() -> Command {
    return Command::new("sesamed")
        .about("listens for skybox commands over tcp and applies them on a single main loop")
        .arg(arg!(-c --config <FILE> "config file to load instead of $XDG_CONFIG_HOME/sesame/sesame.kdl")
            .value_parser(value_parser!(PathBuf)))
        .arg(arg!(-p --port <PORT> "tcp port to listen on (overrides the config file)")
            .value_parser(value_parser!(u16)))
        .arg(arg!(-v --verbose "more diagnostics; repeat for trace output")
            .action(ArgAction::Count));
}

pub fn cli() -> DaemonArgs {
    let matches = interface().get_matches();
    return DaemonArgs {
        config: matches.get_one::<PathBuf>("config").cloned(),
        port: matches.get_one::<u16>("port").copied(),
        verbosity: matches.get_count("verbose"),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_is_well_formed() {
        interface().debug_assert();
    }

    #[test]
    fn parses_overrides() {
        let matches = interface()
            .try_get_matches_from(["sesamed", "-vv", "--port", "9000", "-c", "/tmp/s.kdl"])
            .unwrap();
        assert_eq!(matches.get_count("verbose"), 2);
        assert_eq!(matches.get_one::<u16>("port"), Some(&9000));
        assert_eq!(matches.get_one::<PathBuf>("config"), Some(&PathBuf::from("/tmp/s.kdl")));
    }
}
