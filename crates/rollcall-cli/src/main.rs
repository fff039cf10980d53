use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_client::{EnrollRequest, IdentifyScope, RosterClient};
use rollcall_core::{FacialDescriptor, IdentificationResult};
use rollcall_hw::{CameraSession, FrameSource, Headless, V4lBackend};
use rollcall_kiosk::Config;
use rollcall_shell::{
    CacheStorage, DirStorage, HttpNetwork, RouteClassifier, ShellCache, ShellManifest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify a stored descriptor against the roster
    Identify {
        /// JSON file holding a 128-value descriptor array
        #[arg(short, long)]
        descriptor: PathBuf,
        /// Restrict matching to one class (overrides config)
        #[arg(long)]
        class_id: Option<String>,
        /// Ask the backend to mark attendance on a match
        #[arg(long)]
        mark_present: bool,
    },
    /// Mark a student present
    Mark {
        student_id: String,
    },
    /// Enroll a student with a stored descriptor
    Enroll {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        class_id: Option<String>,
        /// JSON file holding a 128-value descriptor array
        #[arg(short, long)]
        descriptor: PathBuf,
    },
    /// List the students of a class
    Roster {
        /// Class id (defaults to the configured one)
        class_id: Option<String>,
    },
    /// Manage the offline shell cache
    Shell {
        #[command(subcommand)]
        action: ShellAction,
    },
    /// List V4L2 capture devices
    Cameras,
    /// Open the configured camera and grab one frame
    Probe,
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum ShellAction {
    /// Snapshot the shell assets into the current generation
    Install,
    /// Drop every generation except the current one
    Activate,
    /// Install, then activate immediately
    Update,
    /// Serve one request through the cache layer
    Fetch {
        target: String,
    },
    /// List stored generations and their entries
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(api_base = %config.api_base, models_base = %config.models_base, "configuration loaded");

    match cli.command {
        Commands::Identify {
            descriptor,
            class_id,
            mark_present,
        } => {
            let descriptor = read_descriptor(&descriptor)?;
            let scope = IdentifyScope {
                class_id: class_id.or_else(|| config.class_id.clone()),
                mark_present: mark_present || config.mark_present,
            };
            match client(&config)?.identify_scoped(&descriptor, &scope).await {
                IdentificationResult::Matched { student, score } => {
                    println!("Matched: {} ({}) score {score}", student.name, student.student_id);
                    if let Some(phone) = &student.parent_phone {
                        println!("Parent phone: {phone}");
                    }
                }
                IdentificationResult::NotMatched { best_score } => match best_score {
                    Some(best) => println!("No match (bestScore: {best})"),
                    None => println!("No match (bestScore: N/A)"),
                },
                IdentificationResult::Failed { reason } => bail!("identify failed: {reason}"),
            }
        }
        Commands::Mark { student_id } => {
            client(&config)?
                .mark_attendance(&student_id)
                .await
                .with_context(|| format!("failed to mark {student_id} present"))?;
            println!("Attendance marked: {student_id}");
        }
        Commands::Enroll {
            student_id,
            name,
            class_id,
            descriptor,
        } => {
            let request = EnrollRequest {
                student_id,
                name,
                class_id: class_id.or_else(|| config.class_id.clone()),
                embedding: read_descriptor(&descriptor)?,
            };
            let reply = client(&config)?.enroll(&request).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Commands::Roster { class_id } => {
            let Some(class_id) = class_id.or_else(|| config.class_id.clone()) else {
                bail!("no class id given and ROLLCALL_CLASS_ID is not set");
            };
            let students = client(&config)?.class_students(&class_id).await?;
            if students.is_empty() {
                println!("No students in class {class_id}");
            }
            for s in &students {
                match &s.parent_phone {
                    Some(phone) => println!("{}  {}  {phone}", s.student_id, s.name),
                    None => println!("{}  {}", s.student_id, s.name),
                }
            }
        }
        Commands::Shell { action } => run_shell(&config, action).await?,
        Commands::Cameras => {
            let devices = V4lBackend::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in &devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Probe => {
            let session = CameraSession::new(
                Arc::new(V4lBackend::new(config.camera_device.clone())),
                Arc::new(Headless),
            );
            let info = session.start().await?;
            println!(
                "Camera: {} {}x{} {}",
                info.device, info.width, info.height, info.format
            );
            let frame = session.next_frame().await?;
            println!(
                "Frame #{}: avg brightness {:.1}{}",
                frame.sequence,
                frame.avg_brightness(),
                if frame.is_dark(0.95) { " (dark)" } else { "" }
            );
            session.stop();
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn client(config: &Config) -> Result<RosterClient> {
    Ok(RosterClient::new(&config.api_base, config.request_timeout())?)
}

fn read_descriptor(path: &Path) -> Result<FacialDescriptor> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a valid descriptor", path.display()))
}

fn shell_cache(config: &Config) -> Result<ShellCache> {
    let manifest = ShellManifest {
        cache_prefix: config.cache_prefix.clone(),
        version: config.cache_version.clone(),
        ..ShellManifest::default()
    };
    let network = HttpNetwork::new(&config.shell_origin, config.request_timeout())?;
    Ok(ShellCache::new(
        manifest,
        RouteClassifier::new([config.models_base.as_str()]),
        Arc::new(DirStorage::new(config.cache_dir.clone())),
        Arc::new(network),
    ))
}

async fn run_shell(config: &Config, action: ShellAction) -> Result<()> {
    let cache = shell_cache(config)?;
    match action {
        ShellAction::Install => {
            let keys = cache.install().await?;
            println!(
                "Installed {} assets into {}",
                keys.len(),
                cache.manifest().generation()
            );
        }
        ShellAction::Activate => print_activation(&cache.activate().await?),
        ShellAction::Update => print_activation(&cache.update().await?),
        ShellAction::Fetch { target } => {
            let served = cache.handle(&target).await?;
            println!(
                "{target}: {} from {:?} ({:?}, {} bytes)",
                served.response.status,
                served.from,
                served.route,
                served.response.body.len()
            );
        }
        ShellAction::List => {
            let storage = cache.storage();
            let generations = storage.generations().await?;
            if generations.is_empty() {
                println!("No cache generations in {}", config.cache_dir.display());
            }
            for generation in generations {
                let current = if generation == cache.manifest().generation() {
                    " (current)"
                } else {
                    ""
                };
                println!("{generation}{current}");
                for key in storage.entries(&generation).await? {
                    println!("  {key}");
                }
            }
        }
    }
    Ok(())
}

fn print_activation(report: &rollcall_shell::ActivationReport) {
    println!("Active generation: {}", report.current);
    for name in &report.deleted {
        println!("  deleted {name}");
    }
    for (name, reason) in &report.failed {
        println!("  could not delete {name}: {reason}");
    }
}
