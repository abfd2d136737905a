use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use cosem_client::client::{Session, SessionSettings, Timeouts};
use cosem_client::config::{self, CommConfig, MeterConfig, ObjectList};
use cosem_client::output::DirectorySink;
use cosem_client::selective_access::ReadWindow;
use cosem_client::transport::ByteChannel;

/// Reads COSEM objects from a meter and writes one file per object
#[derive(Parser, Debug)]
#[command(name = "cosem-client", version, about, long_about = None)]
struct Cli {
    /// Meter file (id, authentication, HDLC addressing)
    meter: PathBuf,

    /// Object list file
    objects: PathBuf,

    /// Communication file (device, timeouts, retries)
    comm: PathBuf,

    /// Start of the profile window, YYYY-MM-DD.HH:MM:SS
    start: Option<String>,

    /// End of the profile window, YYYY-MM-DD.HH:MM:SS
    end: Option<String>,

    /// Directory receiving `<meter id>/<object>.xml`
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let meter: MeterConfig = config::load_or_default(&cli.meter);
    if meter.id.is_empty() {
        error!("No meter id in {}", cli.meter.display());
        return ExitCode::FAILURE;
    }
    let objects: ObjectList = config::load_or_default(&cli.objects);
    let comm: CommConfig = config::load_or_default(&cli.comm);

    let window = ReadWindow::from_args(cli.start.as_deref(), cli.end.as_deref());
    if let Some(window) = &window {
        info!("Profile window from {} to {:?}", window.start, window.end);
    }

    let params = comm.transport_params();
    info!("Opening {}", params);
    let channel = match ByteChannel::open(&params) {
        Ok(channel) => channel,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let settings = SessionSettings {
        authentication: meter.cosem.authentication(),
        policy: comm.retry_policy(),
        timeouts: Timeouts::from(comm.timeouts),
        modem: comm.modem_settings(),
        window,
    };
    let sink = DirectorySink::new(&cli.output_dir, &meter.id);
    let mut session =
        Session::new(channel, sink, meter.hdlc.link_state(), settings, objects.objects);

    match session.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Meter {}: {}", meter.id, err);
            ExitCode::FAILURE
        }
    }
}
