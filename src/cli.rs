use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::info;

use crate::config::AppConfig;
use crate::platform::{Entity, PlatformClient};
use crate::playlist::{self, PlaylistRequest};
use crate::store::Catalog;
use crate::{generator, sync, tools, web};

const GENERATOR_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "choreo", version, about = "Cycling class track catalog and playlist builder")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server over stdio (default)
    Serve,
    /// Run the HTTP API
    Web,
    /// Pull records from the application platform into the local catalog
    Sync {
        #[arg(value_enum, default_value_t = SyncTarget::All)]
        target: SyncTarget,
    },
    /// Build a class playlist and print it as JSON
    Playlist(PlaylistArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum SyncTarget {
    Tracks,
    Routines,
    Feedback,
    All,
}

#[derive(clap::Args)]
struct PlaylistArgs {
    /// Class length in minutes
    #[arg(long, default_value_t = 45)]
    duration: u32,
    /// beginner, intermediate, advanced or expert
    #[arg(long)]
    difficulty: Option<String>,
    /// Theme keyword required in track notes or focus area
    #[arg(long)]
    theme: Option<String>,
    /// Audience segment (e.g. '50+', 'mixed')
    #[arg(long)]
    audience: Option<String>,
    /// Fill gaps with generated suggestions
    #[arg(long)]
    hybrid: bool,
    /// Desired track count for --hybrid (clamped to 5-30)
    #[arg(long, requires = "hybrid")]
    target_tracks: Option<u32>,
}

pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Web => Ok(web::serve(&config).await?),
        Command::Sync { target } => run_sync(&config, target).await,
        Command::Playlist(args) => print_playlist(&config, args).await,
    }
}

async fn serve(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(db = %config.db_path.display(), "Starting MCP server on stdio");
    let server = tools::ChoreoServer::from_config(config);
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}

async fn run_sync(config: &AppConfig, target: SyncTarget) -> Result<(), Box<dyn std::error::Error>> {
    let platform = config.platform.as_ref().ok_or(
        "Platform sync is not configured. Set BASE44_API_KEY and BASE44_APP_ID.",
    )?;
    let client = PlatformClient::new(platform);
    let catalog = Catalog::new(config.db_path.clone());

    let entity = match target {
        SyncTarget::Tracks => Entity::Track,
        SyncTarget::Routines => Entity::Routine,
        SyncTarget::Feedback => Entity::TrackFeedback,
        SyncTarget::All => {
            let runs = sync::sync_all(&catalog, &client).await;
            println!("{}", serde_json::to_string_pretty(&runs)?);
            let failed: Vec<&str> = runs
                .iter()
                .filter(|r| !r.succeeded())
                .map(|r| r.entity.as_str())
                .collect();
            if !failed.is_empty() {
                return Err(format!("Sync incomplete: {}", failed.join(", ")).into());
            }
            return Ok(());
        }
    };

    let report = sync::sync_entity(&catalog, &client, entity).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn print_playlist(config: &AppConfig, args: PlaylistArgs) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Catalog::new(config.db_path.clone());
    let request = PlaylistRequest {
        duration_minutes: args.duration,
        difficulty: args.difficulty,
        theme: args.theme,
        audience: args.audience,
    };

    let json = if args.hybrid {
        let generator = generator::from_config(&config.generator);
        let built = playlist::build_hybrid_playlist(
            &catalog,
            generator.as_ref(),
            &request,
            args.target_tracks,
            config.tool_target_rule,
            config.generator.timeout + GENERATOR_GRACE,
        )
        .await?;
        serde_json::to_string_pretty(&built)?
    } else {
        let built = {
            let conn = catalog.conn()?;
            let mut rng = rand::rng();
            playlist::assemble(&conn, &request, &mut rng)?
        };
        serde_json::to_string_pretty(&built)?
    };
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["choreo"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn sync_defaults_to_all() {
        let cli = Cli::try_parse_from(["choreo", "sync"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Sync { target: SyncTarget::All })));
        let cli = Cli::try_parse_from(["choreo", "sync", "feedback"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Sync { target: SyncTarget::Feedback })));
    }

    #[test]
    fn playlist_flags() {
        let cli = Cli::try_parse_from([
            "choreo",
            "playlist",
            "--duration",
            "60",
            "--audience",
            "50+",
            "--hybrid",
            "--target-tracks",
            "12",
        ])
        .unwrap();
        let Some(Command::Playlist(args)) = cli.command else {
            panic!("expected playlist subcommand");
        };
        assert_eq!(args.duration, 60);
        assert_eq!(args.audience.as_deref(), Some("50+"));
        assert!(args.hybrid);
        assert_eq!(args.target_tracks, Some(12));
    }

    #[test]
    fn target_tracks_requires_hybrid() {
        assert!(Cli::try_parse_from(["choreo", "playlist", "--target-tracks", "12"]).is_err());
    }
}
