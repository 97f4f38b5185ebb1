use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use vignette_contracts::commands::{parse_intent, Intent, STUDIO_HELP_COMMANDS};
use vignette_contracts::context::SessionContext;
use vignette_contracts::events::EventWriter;
use vignette_contracts::grid::STANDARD_GRID;
use vignette_contracts::images::{mime_for_extension, ImageRef};
use vignette_engine::export::export_to_path;
use vignette_engine::sprites::DEFAULT_FRAME_DURATION_MS;
use vignette_engine::{
    default_backend_registry, BackendRegistry, GenerativeBackend, ModelOverrides, PortraitStudio,
    SpriteSheet, StillFileCamera,
};

#[derive(Debug, Parser)]
#[command(name = "vignette", version, about = "Animated character portrait studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive portrait session driven by slash commands.
    Studio(StudioArgs),
    /// Turn a 4x4 sprite sheet image into a looping GIF.
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct StudioArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Session context JSON (character rules, scenes, continuity summary).
    #[arg(long)]
    context: Option<PathBuf>,
    #[arg(long, default_value = "dryrun")]
    backend: String,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    edit_model: Option<String>,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    sheet: PathBuf,
    #[arg(long, default_value_t = DEFAULT_FRAME_DURATION_MS)]
    duration_ms: u64,
    #[arg(long)]
    out: PathBuf,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("vignette error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("VIGNETTE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("vignette_engine=info,vignette_cli=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Studio(args) => {
            run_studio(args)?;
            Ok(0)
        }
        Command::Export(args) => run_export(args),
    }
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let bytes =
        fs::read(&args.sheet).with_context(|| format!("failed reading {}", args.sheet.display()))?;
    let image = ImageRef::new(mime_for_path(&args.sheet), bytes);
    let sheet = SpriteSheet::new(image, STANDARD_GRID, args.duration_ms)?;
    export_to_path(&sheet, &args.out)?;
    println!(
        "Exported {} frames at {} ms to {}",
        sheet.frame_count(),
        sheet.frame_duration_ms(),
        args.out.display()
    );
    Ok(0)
}

struct Session {
    studio: PortraitStudio,
    backends: BackendRegistry,
    backend_name: String,
    context: SessionContext,
    out_dir: PathBuf,
}

fn lookup_backend<'a>(
    backends: &'a BackendRegistry,
    name: &str,
) -> Result<&'a dyn GenerativeBackend> {
    match backends.get(name) {
        Some(backend) => Ok(backend.as_ref()),
        None => bail!("unknown backend '{name}'"),
    }
}

fn run_studio(args: StudioArgs) -> Result<()> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed creating {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let overrides = ModelOverrides {
        text: args.text_model.clone(),
        image: args.image_model.clone(),
        edit: args.edit_model.clone(),
    };
    let backends = default_backend_registry(&overrides)?;
    if backends.get(&args.backend).is_none() {
        bail!(
            "unknown backend '{}' (available: {})",
            args.backend,
            backends.list().join(", ")
        );
    }
    let context = match args.context.as_deref() {
        Some(path) => SessionContext::load(path)?,
        None => SessionContext::default(),
    };
    let run_id = Uuid::new_v4().to_string();
    let studio =
        PortraitStudio::new(STANDARD_GRID).with_events(EventWriter::new(&events_path, &run_id));
    info!(run_id = %run_id, backend = %args.backend, "studio session started");

    let mut session = Session {
        studio,
        backends,
        backend_name: args.backend.trim().to_ascii_lowercase(),
        context,
        out_dir: args.out.clone(),
    };

    let stdin = io::stdin();
    let mut line = String::new();
    println!("Vignette studio started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        if intent.action == "noop" {
            continue;
        }
        if intent.action == "quit" {
            break;
        }
        handle_intent(&mut session, &intent)?;
    }

    session.studio.close_camera();
    Ok(())
}

fn handle_intent(session: &mut Session, intent: &Intent) -> Result<()> {
    match intent.action.as_str() {
        "help" => {
            println!("Commands: {}", STUDIO_HELP_COMMANDS.join(" "));
            println!("Plain text is treated as an edit instruction.");
        }
        "generate" => {
            let backend = lookup_backend(&session.backends, &session.backend_name)?;
            match session.studio.generate(backend, &session.context) {
                Ok(()) => report_portrait(session, "Portrait generated")?,
                Err(err) => println!("Generate failed: {err}"),
            }
        }
        "edit" => {
            let instruction = intent.instruction.as_deref().unwrap_or_default();
            let backend = lookup_backend(&session.backends, &session.backend_name)?;
            match session.studio.edit(backend, instruction) {
                Ok(true) => report_portrait(session, "Portrait edited")?,
                Ok(false) => println!("/edit needs an instruction and a portrait"),
                Err(err) => println!("Edit failed: {err}"),
            }
        }
        "animate" => {
            let instruction = intent.instruction.as_deref().unwrap_or_default();
            let backend = lookup_backend(&session.backends, &session.backend_name)?;
            match session.studio.animate(backend, instruction, &session.context) {
                Ok(true) => {
                    if let Some(sheet) = session.studio.state().sprite_sheet() {
                        println!(
                            "Animation ready: {} frames, {} ms each",
                            sheet.frame_count(),
                            sheet.frame_duration_ms()
                        );
                    }
                }
                Ok(false) => println!("/animate needs a motion description and a portrait"),
                Err(err) => println!("Animate failed: {err}"),
            }
        }
        "undo" => match session.studio.undo() {
            Ok(true) => report_portrait(session, "Undone")?,
            Ok(false) => println!("Nothing to undo"),
            Err(err) => println!("Undo failed: {err}"),
        },
        "open_camera" => {
            let Some(path) = intent.arg_str("path") else {
                println!("/camera requires a still image path");
                return Ok(());
            };
            let mut camera = StillFileCamera::new(path);
            match session.studio.open_camera(&mut camera) {
                Ok(()) => println!("Camera open ({path}). Use /capture to take the photo."),
                Err(err) => println!("Camera failed: {err}"),
            }
        }
        "capture" => match session.studio.capture() {
            Ok(()) => report_portrait(session, "Photo captured")?,
            Err(err) => println!("Capture failed: {err}"),
        },
        "close_camera" => {
            if session.studio.close_camera() {
                println!("Camera closed");
            } else {
                println!("Camera was not open");
            }
        }
        "export" => {
            let dir = intent
                .arg_str("path")
                .map(PathBuf::from)
                .unwrap_or_else(|| session.out_dir.clone());
            match session.studio.export(&dir) {
                Ok(path) => println!("Exported {}", path.display()),
                Err(err) => println!("Export failed: {err}"),
            }
        }
        "load_context" => {
            let Some(path) = intent.arg_str("path") else {
                println!("/context requires a JSON file path");
                return Ok(());
            };
            match SessionContext::load(Path::new(path)) {
                Ok(context) => {
                    println!(
                        "Context loaded: {} scene(s), active scene {}",
                        context.scene_descriptions.len(),
                        context.current_scene_index + 1
                    );
                    session.context = context;
                }
                Err(err) => println!("Context failed: {err:#}"),
            }
        }
        "set_backend" => {
            let name = intent.arg_str("name").unwrap_or_default().to_ascii_lowercase();
            if session.backends.get(&name).is_some() {
                println!("Backend set to {name}");
                session.backend_name = name;
            } else {
                println!(
                    "Unknown backend '{name}' (available: {})",
                    session.backends.list().join(", ")
                );
            }
        }
        "status" => print_status(session),
        "frame" => match (session.studio.current_frame(), session.studio.current_tile()) {
            (Some(frame), Some(tile)) => println!(
                "Frame {frame}: tile at ({:.2}, {:.2}) size {:.2}",
                tile.x, tile.y, tile.width
            ),
            _ => println!("No animation is playing"),
        },
        "unknown" => {
            let command = intent.arg_str("command").unwrap_or_default();
            println!("Unknown command /{command}. Type /help for commands.");
        }
        other => println!("Unhandled action {other}"),
    }
    Ok(())
}

fn report_portrait(session: &Session, label: &str) -> Result<()> {
    let Some(image) = session.studio.state().current_image() else {
        println!("{label}");
        return Ok(());
    };
    let path = save_still(&session.out_dir, image)?;
    println!(
        "{label} ({} bytes, history {}) -> {}",
        image.len(),
        session.studio.state().history().len(),
        path.display()
    );
    Ok(())
}

/// Writes the current still next to the event log so it can be viewed.
fn save_still(out_dir: &Path, image: &ImageRef) -> Result<PathBuf> {
    let path = out_dir.join(format!("portrait-current.{}", image.extension()));
    fs::write(&path, image.bytes())
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(path)
}

fn print_status(session: &Session) {
    let state = session.studio.state();
    println!("Mode: {}", session.studio.mode());
    println!("Backend: {}", session.backend_name);
    match state.current_image() {
        Some(image) => println!("Portrait: {} ({} bytes)", image.mime_type(), image.len()),
        None => println!("Portrait: none"),
    }
    println!("History: {}", state.history().len());
    match state.frame_duration_ms() {
        Some(ms) => println!("Animation: {ms} ms per frame"),
        None => println!("Animation: none"),
    }
    println!("Camera: {}", if session.studio.camera_open() { "open" } else { "closed" });
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    mime_for_extension(ext)
}
