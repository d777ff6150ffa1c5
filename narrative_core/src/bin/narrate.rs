//! `narrate` - play a narrative from the terminal.
//!
//! Each line read from stdin is a user turn. Lines starting with `/` are commands:
//! `/go X Y`, `/step`, `/stop`, `/rewind N`, `/map`, `/quit`. Ctrl-C cancels a reply that
//! is still being generated.
//!
//! The story a narrative was started from is saved beside it as `<id>.story.json`, so
//! `--narrative` can resume without `--story`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use narrative_core::{
    EngineConfig, FileStore, NarrativeEngine, NarrativeEvent, ProviderClient, Story,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use world_rules::{Character, Coords, NarrativeId};

#[derive(Debug, Parser)]
#[command(name = "narrate", about = "Run a branching narrative in the terminal.")]
struct Cli {
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory holding one JSON file per narrative.
    #[arg(long, default_value = "narratives")]
    data_dir: PathBuf,

    /// Story definition (JSON). When absent, a resumed narrative uses its saved story and
    /// a new one uses a minimal two-character story.
    #[arg(long)]
    story: Option<PathBuf>,

    /// Resume an existing narrative instead of starting a new one.
    #[arg(long)]
    narrative: Option<Uuid>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "narrative_core=info,narrate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        EngineConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        tracing::warn!(path = %cli.config.display(), "Config file not found, using defaults");
        EngineConfig::default()
    };

    let story = match (&cli.story, cli.narrative) {
        (Some(path), _) => read_story(path)?,
        (None, Some(uuid)) => {
            let path = saved_story_path(&cli.data_dir, NarrativeId::from_uuid(uuid));
            read_story(&path).context("no saved story for this narrative; pass --story")?
        }
        (None, None) => default_story(),
    };
    let Some(user) = story.user().map(|c| c.id) else {
        bail!("story {} has no user character", story.title);
    };

    let store = FileStore::open(&cli.data_dir).await?;
    let generator = ProviderClient::from_config(&config.generator)?;
    tracing::info!(provider = generator.provider().name(), "Generator ready");
    let engine = NarrativeEngine::new(store, generator, config);

    let narrative = match cli.narrative {
        Some(uuid) => NarrativeId::from_uuid(uuid),
        None => {
            let id = engine.create_narrative(&story).await?;
            let path = saved_story_path(&cli.data_dir, id);
            tokio::fs::write(&path, serde_json::to_vec_pretty(&story)?)
                .await
                .with_context(|| format!("saving story to {}", path.display()))?;
            id
        }
    };
    println!("Narrative {narrative} ({})", story.title);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            match run_command(&engine, narrative, command).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    continue;
                }
            }
        }

        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };
        let result = engine
            .take_turn(narrative, &story, user, line, &cancel)
            .await;
        watcher.abort();

        match result {
            Ok(outcome) => {
                for event in &outcome.events {
                    if let NarrativeEvent::Arrived { name, .. } = event {
                        println!("[You have moved to {name}.]");
                    }
                }
                if let (Some(reply), Some(speaker)) = (outcome.reply, outcome.speaker) {
                    let name = story
                        .character(speaker)
                        .map(|c| c.name.as_str())
                        .unwrap_or("Unknown");
                    println!("{name}: {}", reply.content);
                }
            }
            Err(e) if e.is_cancelled() => println!("(reply cancelled)"),
            Err(e) => eprintln!("error: {e}"),
        }
    }

    Ok(())
}

/// Run a slash command. Returns false when the session should end.
async fn run_command<S, G>(
    engine: &NarrativeEngine<S, G>,
    narrative: NarrativeId,
    command: &str,
) -> Result<bool>
where
    S: narrative_core::NarrativeStore,
    G: narrative_core::TextGenerator,
{
    let mut parts = command.split_whitespace();
    match parts.next() {
        Some("quit") => return Ok(false),
        Some("go") => {
            let x: i32 = parts.next().context("usage: /go X Y")?.parse()?;
            let y: i32 = parts.next().context("usage: /go X Y")?.parse()?;
            let plan = engine.plan_travel(narrative, Coords::new(x, y)).await?;
            println!("[{} steps to {}]", plan.steps.len(), plan.destination);
        }
        Some("step") => {
            for event in engine.step_travel(narrative).await? {
                match event {
                    NarrativeEvent::StepTaken { at } => println!("[Now at {at}]"),
                    NarrativeEvent::Arrived { name, .. } => println!("[You have moved to {name}.]"),
                    _ => {}
                }
            }
        }
        Some("stop") => engine.cancel_travel(narrative).await?,
        Some("rewind") => {
            let after: u64 = parts.next().context("usage: /rewind N")?.parse()?;
            engine.rewind(narrative, after).await?;
        }
        Some("map") => {
            let map = engine.world_map(narrative).await?;
            let here = map
                .current_location()
                .map(|l| l.display_name())
                .unwrap_or_else(|| map.current().to_string());
            println!("[At {here}, {} steps in flight]", map.path_len());
        }
        Some(other) => bail!("unknown command: /{other}"),
        None => {}
    }
    Ok(true)
}

fn saved_story_path(data_dir: &Path, narrative: NarrativeId) -> PathBuf {
    data_dir.join(format!("{narrative}.story.json"))
}

fn read_story(path: &Path) -> Result<Story> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading story {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing story {}", path.display()))
}

fn default_story() -> Story {
    Story::new("Untitled")
        .with_character(Character::new("You").as_user())
        .with_character(
            Character::new("Narrator")
                .as_narrator()
                .with_description("Describes the world and what happens in it"),
        )
}
