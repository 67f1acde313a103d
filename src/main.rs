use anyhow::{Context, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{error, info};
use std::path::PathBuf;
use std::process;
use video_streamer::config::{app_name, app_version};
use video_streamer::utils::sos;

const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration of the stream.")
                .required_unless_present("versions"),
        )
        .arg(
            Arg::new("versions")
                .long("versions")
                .help("Print the media library versions and exit.")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config = match config_path(&matches) {
        Ok(config) => config,
        Err(err) => {
            error!("{:#}", err);
            process::exit(EXIT_USAGE);
        }
    };

    // request a graceful stop on SIGINT, the frame loop flushes and finalizes
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, stopping");
        sos::get_instance().cancel();
    })
    .expect("Error setting Ctrl-C handler");

    process::exit(run(config, matches.get_flag("versions")));
}

fn config_path(matches: &ArgMatches) -> anyhow::Result<Option<PathBuf>> {
    let Some(path) = matches.get_one::<String>("config") else {
        return Ok(None);
    };
    let path = PathBuf::from(path);
    let metadata = std::fs::metadata(&path)
        .with_context(|| format!("configuration file '{}' is not accessible", path.display()))?;
    if !metadata.is_file() {
        bail!("configuration file '{}' is not a regular file", path.display());
    }
    Ok(Some(path))
}

#[cfg(feature = "ffmpeg")]
fn run(config: Option<PathBuf>, versions_only: bool) -> i32 {
    use video_streamer::StreamPipeline;
    use video_streamer::media::ffmpeg::FfmpegBackend;

    let backend = match FfmpegBackend::new() {
        Ok(backend) => backend,
        Err(err) => {
            error!("unable to initialize the media library: {}", err);
            return EXIT_USAGE;
        }
    };

    let mut pipeline = StreamPipeline::with_defaults(backend);
    for version in pipeline.library_versions() {
        if versions_only {
            println!("{}", version);
        } else {
            info!("{}", version);
        }
    }
    let Some(config) = config.filter(|_| !versions_only) else {
        return 0;
    };

    if !pipeline.setup(&config.to_string_lossy()) {
        return EXIT_FAILURE;
    }
    if pipeline.process() { 0 } else { EXIT_FAILURE }
}

#[cfg(not(feature = "ffmpeg"))]
fn run(_config: Option<PathBuf>, _versions_only: bool) -> i32 {
    eprintln!("{} was built without FFmpeg support; rebuild with --features ffmpeg", app_name());
    EXIT_FAILURE
}
