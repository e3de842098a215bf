use sesame::commands::{parse_hex_color, Command as SesameCommand, ImageCommand};
use sesame::compositor::Placement;
use sesame::Rgba;

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{arg, value_parser, ArgMatches, Command};
use miette::{IntoDiagnostic, WrapErr};

// keep in step with sesame::config::DEFAULT_PORT
const DEFAULT_ADDR: &str = "127.0.0.1:8052";

fn cli() -> Command {
    Command::new("sesame")
    .about("sends skybox and logging commands to a running sesamed")
    .subcommand_required(true)
    .arg(arg!(--addr <ADDR> "address of the daemon")
        .value_parser(value_parser!(SocketAddr))
        .default_value(DEFAULT_ADDR)
        .global(true)
    )
    .subcommand(Command::new("image")
        .about("upload an image; the daemon pads it onto a square canvas and stores it under <id>")
        .arg(arg!(<id> "name to store the image under"))
        .arg(arg!(<file> "png or jpeg file to send").value_parser(value_parser!(PathBuf)))
        .arg(arg!(--x <X> "left edge on the canvas (centered when omitted)")
            .value_parser(value_parser!(u32))
            .requires("y"))
        .arg(arg!(--y <Y> "top edge on the canvas")
            .value_parser(value_parser!(u32))
            .requires("x"))
        .arg_required_else_help(true)
    )
    .subcommand(Command::new("size")
        .about("side length in pixels for images uploaded after this")
        .arg(arg!(<size> "canvas side length").value_parser(value_parser!(i64)))
        .arg_required_else_help(true)
    )
    .subcommand(Command::new("color")
        .about("padding color for images uploaded after this")
        .arg(arg!(<color> "hex color, #RRGGBB or #RRGGBBAA").value_parser(parse_hex_color))
        .arg_required_else_help(true)
    )
    .subcommand(Command::new("flip")
        .about("make a stored image the active environment")
        .arg(arg!(<id> "name the image was uploaded under"))
        .arg_required_else_help(true)
    )
    .subcommand(Command::new("init-log")
        .about("open (and truncate) the daemon's experiment log")
        .arg(arg!(<path> "log file path, as seen by the daemon").value_parser(value_parser!(PathBuf)))
        .arg_required_else_help(true)
    )
    .subcommand(Command::new("log")
        .about("append one line to the experiment log")
        .arg(arg!(<message> "text of the line"))
        .arg_required_else_help(true)
    )
}

// clap enforces required args, so a miss here is a bug in cli()
fn extract<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, key: &str) -> miette::Result<T> {
    return matches
        .get_one::<T>(key)
        .cloned()
        .ok_or_else(|| miette::miette!("missing argument <{key}>"));
}

fn build_command(matches: &ArgMatches) -> miette::Result<SesameCommand> {
    let cmd = match matches.subcommand() {
        Some(("image", sub_matches)) => {
            let file: PathBuf = extract(sub_matches, "file")?;
            let data = fs::read(&file)
                .into_diagnostic()
                .wrap_err_with(|| format!("could not read {}", file.display()))?;
            let placement = match (sub_matches.get_one::<u32>("x"), sub_matches.get_one::<u32>("y")) {
                (Some(&x), Some(&y)) => Placement::At { x, y },
                _ => Placement::Center,
            };
            SesameCommand::SetImage(ImageCommand {
                id: extract(sub_matches, "id")?,
                data,
                placement,
            })
        }
        Some(("size", sub_matches)) => SesameCommand::SetEnvironmentSize(extract(sub_matches, "size")?),
        Some(("color", sub_matches)) => SesameCommand::SetEnvironmentColor(extract::<Rgba<u8>>(sub_matches, "color")?),
        Some(("flip", sub_matches)) => SesameCommand::SwapEnvironment(extract(sub_matches, "id")?),
        Some(("init-log", sub_matches)) => SesameCommand::OpenLog(extract(sub_matches, "path")?),
        Some(("log", sub_matches)) => SesameCommand::LogMessage(extract(sub_matches, "message")?),
        _ => unreachable!(),
    };
    return Ok(cmd);
}

fn main() -> miette::Result<()> {
    let matches = cli().get_matches();
    let addr: SocketAddr = extract(&matches, "addr")?;
    let command = build_command(&matches)?;
    // fire and forget: the daemon never answers
    sesame::sockets::write_command_to_daemon_socket(addr, &command)
        .into_diagnostic()
        .wrap_err_with(|| format!("could not send {} to {addr} (is the daemon running?)", command.tag()))
}
