mod console;
mod settings;

use crate::self_test::self_test;
use crate::settings::Settings;
use anyhow::{Context, anyhow};
use apc_library::animation::{AnimationRegistry, SceneSpec};
use apc_library::dispatch::{self, FrameDispatcher, FrameSender};
use apc_library::runtime::{Command, Runtime};
use apc_library::store::ConfigStore;
use apc_library::transport::{self, Connector, InboundMessage, LinkStatus, MemoryTransport, MidiConnector};
use apc_library::Controller;
use clap::Parser;
use config::Config;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

// Inbound messages buffered between the MIDI callback and the engine.
const INBOUND_DEPTH: usize = 1024;
const RECONNECT_EVERY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[clap(
    name = "APC mini mk2 LED driver",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Args {
    #[clap(short, long, help = "Config file (TOML; APC_* environment variables override it)")]
    config: Option<String>,

    #[clap(short, long, help = "Profile to load at startup, overrides the config's profile")]
    profile: Option<String>,

    #[clap(long, help = "List MIDI ports and exit")]
    list_ports: bool,

    #[clap(long, help = "Run without a device; output is recorded and counted")]
    dry_run: bool,

    #[clap(short, long, help = "Start with a grid-wide scene, e.g. rainbow")]
    scene: Option<String>,

    #[clap(short, long, help = "Exit after this many seconds")]
    duration: Option<f64>,
}

fn load_settings(path: Option<&str>) -> anyhow::Result<Settings> {
    let mut cfg = Config::builder();

    if let Some(config_fn) = path {
        cfg = cfg.add_source(config::File::with_name(config_fn));
    }
    cfg = cfg.add_source(config::Environment::with_prefix("APC").try_parsing(true));

    let cfg = cfg.build().context("Can't create settings")?;
    let settings: Settings = cfg.try_deserialize().context("Can't parse settings")?;
    settings.validate().map_err(|e| anyhow!(e))?;
    Ok(settings)
}

fn build_controller(args: &Args, settings: &Settings) -> anyhow::Result<Controller> {
    let mut store = ConfigStore::new(Arc::new(AnimationRegistry::with_builtins()));

    if let Some(path) = args.profile.as_deref().or(settings.profile()) {
        let bytes = std::fs::read(path).with_context(|| format!("Can't read profile {path}"))?;
        store
            .load_profile(&bytes)
            .with_context(|| format!("Can't load profile {path}"))?;
        log::info!("loaded profile {path}");
    }

    if let Some(effect) = &args.scene {
        store
            .set_scene(Some(SceneSpec {
                effect: effect.clone(),
                speed: 1.0,
                seed: rand::random(),
            }))
            .context("Can't start scene")?;
    }

    let mut controller = Controller::new(store);
    controller.set_follow_clock(settings.follow_clock);
    Ok(controller)
}

fn print_ports(client_name: &str) -> anyhow::Result<()> {
    let ports = transport::list_ports(client_name).context("Can't list MIDI ports")?;
    println!("Inputs:");
    for name in &ports.inputs {
        println!("  {name}");
    }
    println!("Outputs:");
    for name in &ports.outputs {
        println!("  {name}");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let settings = load_settings(args.config.as_deref())?;

    if args.list_ports {
        return print_ports(&settings.client_name);
    }

    log::info!("Running with settings:");
    log::info!("{settings:?}");

    let controller = build_controller(&args, &settings)?;
    let encoding = settings.color_encoding().map_err(|e| anyhow!(e))?;

    let (inbound_tx, inbound_rx) = crossbeam_channel::bounded::<InboundMessage>(INBOUND_DEPTH);
    let recorder = args.dry_run.then(MemoryTransport::new);
    let connector: Box<dyn Connector> = match &recorder {
        Some(recorder) => Box::new(recorder.connector()),
        None => Box::new(MidiConnector::new(settings.port_selection(), inbound_tx)),
    };

    let status = Arc::new(LinkStatus::default());
    let (batch_tx, batch_rx) = dispatch::queue(settings.queue_depth);
    let sender = FrameSender::spawn(connector, batch_rx, Arc::clone(&status), RECONNECT_EVERY)
        .context("Can't start sender thread")?;

    let mut dispatcher = FrameDispatcher::new(encoding, settings.max_messages_per_tick, batch_tx);
    if settings.self_test {
        self_test(&mut dispatcher);
    }

    let (command_tx, command_rx) = crossbeam_channel::unbounded::<Command>();
    let runtime = Runtime::spawn(
        controller,
        inbound_rx,
        command_rx,
        dispatcher,
        Arc::clone(&status),
        settings.runtime_options(),
    )
    .context("Can't start engine thread")?;

    let stop = runtime.stop_flag();
    // Left detached: it may be blocked reading stdin when we exit.
    let _console = console::spawn(command_tx, Arc::clone(&stop)).context("Can't start console")?;
    println!("Type help for commands.");

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
    while !stop.load(Ordering::SeqCst) && !runtime.is_finished() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    log::info!("shutting down");
    runtime.stop().map_err(|_| anyhow!("engine thread panicked"))?;
    sender.join().map_err(|_| anyhow!("sender thread panicked"))?;

    if let Some(recorder) = recorder {
        println!("dry run: {} messages sent", recorder.sent().len());
    }
    Ok(())
}
