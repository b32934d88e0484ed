use cckd::compression::Kind;
use cckd::config::{ByteOrderDetection, SlotFit};
use cckd::{nbd, Config, Endian, Image, ImageBuilder, ServerConfig};
use clap::{crate_version, value_parser, Arg, ArgAction, ArgMatches, Command, ValueHint};
use parking_lot::Mutex;
use slog::Logger;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::{Format, Severity};
use sloggers::Build;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

fn image_arg() -> Arg {
    Arg::new("image")
        .help("path to the compressed CKD image")
        .value_name("IMAGE")
        .value_hint(ValueHint::FilePath)
        .value_parser(value_parser!(PathBuf))
        .required(true)
}

fn config_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("legacy-byte-order")
            .long("legacy-byte-order")
            .help("always read the image as little endian, ignoring the header option bit")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("allow-exact-fit")
            .long("allow-exact-fit")
            .help("reuse free space slots exactly as large as a track image")
            .action(ArgAction::SetTrue),
    )
}

fn parse_dataset(s: &str) -> Result<(String, u16), String> {
    let (name, cylinders) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected NAME:CYLINDERS, got {:?}", s))?;
    let cylinders = cylinders
        .parse::<u16>()
        .map_err(|e| format!("bad cylinder count {:?}: {}", cylinders, e))?;
    if name.is_empty() || name.len() > 44 || cylinders == 0 {
        return Err(format!("bad dataset {:?}", s));
    }
    Ok((name.to_ascii_uppercase(), cylinders))
}

fn parse_compression(s: &str) -> Result<Kind, String> {
    match Kind::from_name(s) {
        kind if kind.supported() => Ok(kind),
        _ => Err(format!("unsupported compression {:?}", s)),
    }
}

fn build_cli() -> Command {
    Command::new("cckd-nbd")
        .about("Serve the datasets of compressed CKD disk images as network block devices")
        .version(crate_version!())
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("log more, repeat for even more")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand(config_args(
            Command::new("serve")
                .about("serve every dataset of IMAGE as an NBD export")
                .arg(image_arg())
                .arg(
                    Arg::new("listen")
                        .short('l')
                        .long("listen")
                        .value_name("ADDR")
                        .help("address to listen on")
                        .value_parser(value_parser!(SocketAddr))
                        .default_value("127.0.0.1:10809"),
                )
                .arg(
                    Arg::new("read-only")
                        .long("read-only")
                        .help("reject writes")
                        .action(ArgAction::SetTrue),
                ),
        ))
        .subcommand(config_args(
            Command::new("list")
                .about("list the datasets of IMAGE")
                .arg(image_arg()),
        ))
        .subcommand(
            Command::new("create")
                .about("create a new, empty image")
                .arg(image_arg())
                .arg(
                    Arg::new("cylinders")
                        .short('c')
                        .long("cylinders")
                        .value_name("N")
                        .value_parser(value_parser!(u32).range(2..=65520))
                        .required(true),
                )
                .arg(
                    Arg::new("heads")
                        .long("heads")
                        .value_name("H")
                        .value_parser(value_parser!(u32).range(1..=255))
                        .default_value("15"),
                )
                .arg(
                    Arg::new("volser")
                        .long("volser")
                        .value_name("V")
                        .help("volume serial, up to six characters")
                        .default_value("VOL001"),
                )
                .arg(
                    Arg::new("big-endian")
                        .long("big-endian")
                        .help("store tables in big endian byte order")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("compression")
                        .long("compression")
                        .value_name("NAME")
                        .help("compression of new tracks, none or zlib")
                        .value_parser(parse_compression)
                        .default_value("zlib"),
                )
                .arg(
                    Arg::new("level")
                        .long("level")
                        .value_name("0-9")
                        .help("compression level, the codec default if not given")
                        .value_parser(value_parser!(u8).range(0..=9)),
                )
                .arg(
                    Arg::new("dataset")
                        .short('d')
                        .long("dataset")
                        .value_name("NAME:CYLS")
                        .help("add a dataset of CYLS cylinders, after the previous one")
                        .value_parser(parse_dataset)
                        .action(ArgAction::Append),
                ),
        )
}

fn build_logger(verbosity: u8) -> Result<Logger, sloggers::Error> {
    let level = match verbosity {
        0 => Severity::Info,
        1 => Severity::Debug,
        _ => Severity::Trace,
    };
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.format(Format::Full);
    builder.build()
}

fn config_from(matches: &ArgMatches) -> Config {
    let mut config = Config::default();
    if matches.get_flag("legacy-byte-order") {
        config.byte_order = ByteOrderDetection::LegacyEquality;
    }
    if matches.get_flag("allow-exact-fit") {
        config.slot_fit = SlotFit::AllowExact;
    }
    config
}

fn image_path(matches: &ArgMatches) -> Result<&PathBuf, Box<dyn Error>> {
    matches
        .get_one::<PathBuf>("image")
        .ok_or_else(|| "no image given".into())
}

fn serve(matches: &ArgMatches, logger: &Logger) -> Result<(), Box<dyn Error>> {
    let path = image_path(matches)?;
    let image = Image::open_with_config(path, config_from(matches), logger.clone())?;
    let mut server_config = ServerConfig {
        read_only: matches.get_flag("read-only"),
        ..ServerConfig::default()
    };
    if let Some(&listen) = matches.get_one::<SocketAddr>("listen") {
        server_config.listen = listen;
    }

    let image = Arc::new(Mutex::new(image));
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        tokio::select! {
            result = nbd::serve(Arc::clone(&image), server_config, logger.clone()) => result,
            _ = tokio::signal::ctrl_c() => {
                slog::info!(logger, "Interrupted, shutting down");
                Ok(())
            }
        }
    });
    drop(runtime);
    image.lock().sync()?;
    result?;
    Ok(())
}

fn list(matches: &ArgMatches, logger: &Logger) -> Result<(), Box<dyn Error>> {
    let path = image_path(matches)?;
    let image = Image::open_with_config(path, config_from(matches), logger.clone())?;
    let geometry = image.geometry();
    println!(
        "{:<44} {:>9} {:>9} {:>12} {:<4} {:<4} {:>5} {:>5} {:<10}",
        "DATASET", "BEGIN", "END", "BYTES", "ORG", "RECF", "LRECL", "BLKSZ", "CREATED"
    );
    for partition in image.partitions().values() {
        let attributes = &partition.attributes;
        let created = attributes
            .created
            .map(|date| date.to_string())
            .unwrap_or_default();
        println!(
            "{:<44} {:>9} {:>9} {:>12} {:<4} {:<4} {:>5} {:>5} {:<10}",
            partition.name,
            partition.begin.to_string(),
            partition.end.to_string(),
            partition.size(&geometry),
            attributes.organization.to_string(),
            attributes.record_format.to_string(),
            attributes.record_length,
            attributes.block_size,
            created
        );
    }
    image.close()?;
    Ok(())
}

fn create(matches: &ArgMatches, logger: &Logger) -> Result<(), Box<dyn Error>> {
    let path = image_path(matches)?;
    let cylinders = matches.get_one::<u32>("cylinders").copied().unwrap_or(2);
    let mut builder = ImageBuilder::new(cylinders);
    builder.set_logger(logger.clone());
    if let Some(&heads) = matches.get_one::<u32>("heads") {
        builder.set_heads(heads);
    }
    if let Some(volser) = matches.get_one::<String>("volser") {
        builder.set_volser(volser.to_ascii_uppercase());
    }
    if matches.get_flag("big-endian") {
        builder.set_endian(Endian::Big);
    }
    if let Some(&kind) = matches.get_one::<Kind>("compression") {
        builder.set_compressor(kind);
    }
    if let Some(&level) = matches.get_one::<u8>("level") {
        builder.set_compression_level(level);
    }
    if let Some(datasets) = matches.get_many::<(String, u16)>("dataset") {
        for (name, cylinders) in datasets {
            builder.add_dataset_cylinders(name.clone(), *cylinders);
        }
    }
    let image = builder.build_path(path)?;
    slog::info!(logger, "Created image"; "partitions" => image.partitions().len());
    image.close()?;
    Ok(())
}

fn main() {
    std::process::exit(real_main());
}

fn real_main() -> i32 {
    let matches = build_cli().get_matches();
    let logger = match build_logger(matches.get_count("verbose")) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Unable to set up logging: {}", e);
            return 2;
        }
    };

    let result = match matches.subcommand() {
        Some(("serve", sub)) => serve(sub, &logger),
        Some(("list", sub)) => list(sub, &logger),
        Some(("create", sub)) => create(sub, &logger),
        _ => Err("no subcommand given".into()),
    };
    match result {
        Ok(()) => 0,
        Err(e) => {
            slog::crit!(logger, "{}", e);
            1
        }
    }
}
