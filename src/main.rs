use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use ugc_forge::{config, kie, session, ui};

use kie::{JobHandle, JobStatus, KieClient, QualityMode};
use session::{GenerationParams, GenerationSession, SessionConfig, UiState};

/// Parse and validate a quality mode ("std" or "pro")
fn parse_mode(s: &str) -> Result<QualityMode, String> {
    QualityMode::from_str(s)
        .ok_or_else(|| format!("Unknown mode '{}'. Available modes: std, pro", s))
}

/// ugc-forge: UGC video ad generator
#[derive(Parser)]
#[command(name = "ugc-forge")]
#[command(version, about = "Generate short vertical UGC-style video ads")]
#[command(long_about = "Configure a product, a hook line, and a source image, \
    submit a video generation job to the KIE.ai Kling API, and watch it \
    render. Jobs take 2-5 minutes; progress is polled every 5 seconds with \
    a 5-minute overall deadline.")]
#[command(after_help = "EXAMPLES:
    # Interactive mode: fill in the form, watch the progress bar
    ugc-forge

    # One-shot generation
    ugc-forge generate --product \"Apple AirPods Pro\" \\
        --hook \"Bluetooth que dura TODO EL DÍA\" \\
        --image-url https://example.com/airpods.jpg

    # Generate and download the finished clip
    ugc-forge generate -p \"AirPods\" -k \"All-day battery\" \\
        -i https://example.com/airpods.jpg --output ad.mp4

    # Check a job you submitted earlier
    ugc-forge status 8f3a0c2e

ENVIRONMENT:
    KIE_API_KEY    Required. Your KIE.ai API key (.env files are read).")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit one generation job and wait for the video
    Generate {
        /// Product name featured in the ad
        #[arg(long, short = 'p')]
        product: String,

        /// Hook line spoken in the first seconds
        #[arg(long, short = 'k')]
        hook: String,

        /// URL of the product image the clip starts from
        #[arg(long, short = 'i')]
        image_url: String,

        /// Quality mode: std or pro (default: pro, or from config file)
        #[arg(long, short = 'm', value_parser = parse_mode)]
        mode: Option<QualityMode>,

        /// Download the finished video to this path
        #[arg(long, short = 'O')]
        output: Option<PathBuf>,

        /// Custom config file path (default: ~/.config/ugc-forge/config.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Query the status of a previously submitted job
    Status {
        /// The task ID returned at submission
        task_id: String,

        /// Custom config file path
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

/// Load .env and check for KIE_API_KEY
///
/// Loads environment variables from a .env file in the working directory.
/// Does not override existing environment variables.
fn load_env() {
    let _ = dotenv::dotenv();
}

/// Load the config file, tolerating a missing default file.
fn load_config(path: Option<&PathBuf>) -> Result<config::Config, String> {
    match path {
        Some(p) => config::Config::load(Some(p)).map_err(|e| e.to_string()),
        None => match config::Config::load(None) {
            Ok(c) => Ok(c),
            Err(e) => {
                eprintln!("Warning: {}", e);
                eprintln!("Using default settings.\n");
                Ok(config::Config::default())
            }
        },
    }
}

/// Build the API client from resolved configuration.
///
/// There is no bundled fallback key: a missing key is a hard error with
/// setup instructions, never a silent default.
fn build_client(cfg: &config::Config) -> Result<KieClient, String> {
    let api_key = cfg.api_key().ok_or_else(|| {
        "KIE_API_KEY is not set.\n\n\
         Add your API key to a .env file:\n\
             echo 'KIE_API_KEY=your-api-key-here' >> .env\n\n\
         Or set it as an environment variable:\n\
             export KIE_API_KEY=\"your-api-key-here\"\n\n\
         Or put it in ~/.config/ugc-forge/config.toml under [api] key."
            .to_string()
    })?;

    match cfg.api.base_url.clone() {
        Some(base_url) => KieClient::with_base_url(api_key, base_url),
        None => KieClient::with_api_key(api_key),
    }
    .map_err(|e| format!("Failed to create API client: {}", e))
}

/// Resolve the quality mode: CLI > config file > default (pro).
fn resolve_mode(cli_mode: Option<QualityMode>, cfg: &config::Config) -> QualityMode {
    cli_mode
        .or_else(|| {
            cfg.generation
                .mode
                .as_deref()
                .and_then(QualityMode::from_str)
        })
        .unwrap_or_default()
}

/// Render a state transition to the terminal.
fn render_transition(state: &UiState) {
    match state {
        UiState::Idle => {}
        UiState::Submitting => ui::print_submitting(),
        UiState::InProgress { task_id, polls } => {
            if *polls == 0 {
                ui::print_job_accepted(task_id);
            }
            ui::print_progress(task_id, *polls);
        }
        UiState::Done { video_url } => ui::print_done(video_url),
        UiState::Failed { message } => ui::print_error(message),
        UiState::TimedOut => ui::print_timed_out(),
    }
}

/// Drive one generation to a terminal state, rendering transitions.
///
/// Returns the terminal state, or `Idle` if the user cancelled with Ctrl+C
/// (the session is reset and both timers are torn down before returning).
async fn drive_session(
    session: &mut GenerationSession,
    rx: &mut watch::Receiver<UiState>,
) -> UiState {
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return UiState::Idle;
                }
                let state = rx.borrow_and_update().clone();
                render_transition(&state);
                if state.is_terminal() {
                    return state;
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                if session::take_ctrlc_received() {
                    session.reset();
                    ui::print_cancelled();
                    return UiState::Idle;
                }
            }
        }
    }
}

/// Run one generation to completion and optionally download the result.
async fn generate_once(
    client: Arc<KieClient>,
    session_config: SessionConfig,
    params: GenerationParams,
    output: Option<&PathBuf>,
) -> Result<UiState, String> {
    let mut session = GenerationSession::new(Arc::clone(&client), session_config);
    let mut rx = session.subscribe();

    session.start_generation(params);
    let final_state = drive_session(&mut session, &mut rx).await;

    if let (UiState::Done { video_url }, Some(dest)) = (&final_state, output) {
        println!("Downloading to {}…", dest.display());
        client
            .download_video(video_url, dest)
            .await
            .map_err(|e| format!("Download failed: {}", e))?;
        println!("Saved {}", dest.display());
    }

    Ok(final_state)
}

/// Run the one-shot generate subcommand.
fn run_generate(
    product: String,
    hook: String,
    image_url: String,
    mode: Option<QualityMode>,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<(), String> {
    let cfg = load_config(config_path.as_ref())?;

    // Boundary validation: a blank field or bad URL never reaches the API.
    kie::validate_inputs(&product, &hook, &image_url).map_err(|e| e.to_string())?;

    let client = Arc::new(build_client(&cfg)?);
    let params = GenerationParams {
        product,
        hook,
        image_url,
        mode: resolve_mode(mode, &cfg),
    };

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create async runtime: {}", e))?;

    rt.block_on(async {
        match generate_once(client, cfg.session_config(), params, output.as_ref()).await? {
            UiState::Done { .. } => Ok(()),
            UiState::Idle => Err("cancelled".to_string()),
            UiState::Failed { message } => Err(message),
            UiState::TimedOut => Err("video generation timed out".to_string()),
            other => Err(format!("unexpected final state: {:?}", other)),
        }
    })
}

/// Run the status subcommand: one authenticated query, printed and done.
fn run_status(task_id: String, config_path: Option<PathBuf>) -> Result<(), String> {
    let cfg = load_config(config_path.as_ref())?;
    let client = build_client(&cfg)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create async runtime: {}", e))?;

    rt.block_on(async {
        let status = client
            .job_status(&JobHandle { task_id })
            .await
            .map_err(|e| e.to_string())?;
        match status {
            JobStatus::Pending => println!("Still rendering."),
            JobStatus::Completed { video_url } => println!("Done: {}", video_url),
            JobStatus::Failed { reason } => println!("Failed: {}", reason),
        }
        Ok(())
    })
}

/// Interactive mode: form, progress, result, repeat.
fn run_studio(config_path: Option<PathBuf>) -> Result<(), String> {
    let cfg = load_config(config_path.as_ref())?;
    let client = Arc::new(build_client(&cfg)?);
    let session_config = cfg.session_config();
    let mode = resolve_mode(None, &cfg);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create async runtime: {}", e))?;

    println!("ugc-forge {} — UGC ad generator", env!("CARGO_PKG_VERSION"));
    println!("Fill in the form to generate a 15-second vertical ad.\n");

    loop {
        let product = ui::read_field("Product", None).map_err(|e| e.to_string())?;
        let hook = ui::read_field("Hook (first 3 seconds)", None).map_err(|e| e.to_string())?;
        let image_url = loop {
            let url = ui::read_field("Source image URL", None).map_err(|e| e.to_string())?;
            match kie::validate_image_url(&url) {
                Ok(()) => break url,
                Err(e) => println!("  {}", e),
            }
        };

        let params = GenerationParams {
            product,
            hook,
            image_url,
            mode,
        };

        let final_state = rt.block_on(generate_once(
            Arc::clone(&client),
            session_config,
            params,
            None,
        ))?;

        let again = match final_state {
            UiState::Done { .. } => ui::confirm("\nGenerate another?"),
            _ => ui::confirm("\nTry again?"),
        };
        if !again {
            break;
        }
        println!();
    }

    Ok(())
}

fn main() {
    load_env();
    env_logger::init();

    if let Err(e) = session::setup_ctrlc_handler() {
        eprintln!("Warning: Could not set up Ctrl+C handler: {}", e);
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Generate {
            product,
            hook,
            image_url,
            mode,
            output,
            config,
        }) => run_generate(product, hook, image_url, mode, output, config),
        Some(Commands::Status { task_id, config }) => run_status(task_id, config),
        None => run_studio(None),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mode_valid() {
        assert_eq!(parse_mode("std").unwrap(), QualityMode::Standard);
        assert_eq!(parse_mode("pro").unwrap(), QualityMode::Pro);
    }

    #[test]
    fn parse_mode_invalid() {
        let err = parse_mode("ultra").unwrap_err();
        assert!(err.contains("Available modes: std, pro"));
    }

    #[test]
    fn resolve_mode_precedence() {
        let mut cfg = config::Config::default();
        cfg.generation.mode = Some("std".to_string());

        // CLI wins over config
        assert_eq!(
            resolve_mode(Some(QualityMode::Pro), &cfg),
            QualityMode::Pro
        );
        // Config wins over default
        assert_eq!(resolve_mode(None, &cfg), QualityMode::Standard);
        // Default is pro
        assert_eq!(
            resolve_mode(None, &config::Config::default()),
            QualityMode::Pro
        );
    }
}
