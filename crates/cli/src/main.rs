//! Operator tool exercising the five orchestrator read operations plus the
//! one write path (`rate`) against a real Postgres deployment. Modeled on the
//! reference workspace's `reel-recs` CLI: `clap` subcommands, `colored`
//! output, a `tracing_subscriber::fmt()` bootstrap.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use sqlx::postgres::PgPoolOptions;

use orchestrator::{Config, FeedItem, Orchestrator};
use profile_builder::apply_rating;
use store::pg::PgStore;
use store::{Movie, MovieId, RatingStatus, Store, UserId};
use vector_index::pg::PgVectorIndex;

/// Taste-Kid movie discovery engine, operator CLI.
#[derive(Parser)]
#[command(name = "taste-kid")]
#[command(about = "Operator CLI for the Taste-Kid discovery engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations to DATABASE_URL.
    Migrate,

    /// Movies similar to a given movie.
    Similar {
        #[arg(long)]
        movie_id: MovieId,
        #[arg(long, default_value = "20")]
        k: usize,
    },

    /// Personalized recommendations for a user.
    Recommend {
        #[arg(long)]
        user_id: UserId,
        #[arg(long, default_value = "20")]
        k: usize,
    },

    /// The user's home feed (falls back to popularity without a profile).
    Feed {
        #[arg(long)]
        user_id: UserId,
        #[arg(long, default_value = "20")]
        k: usize,
    },

    /// Compatibility score (0-100) between a user and a movie.
    Match {
        #[arg(long)]
        user_id: UserId,
        #[arg(long)]
        movie_id: MovieId,
    },

    /// The next movie to show the user (swipe-deck style).
    Next {
        #[arg(long)]
        user_id: UserId,
    },

    /// Record a rating or watched/unwatched status for a user.
    Rate {
        #[arg(long)]
        user_id: UserId,
        #[arg(long)]
        movie_id: MovieId,
        /// 0-5; omit to mark watched-but-unrated.
        #[arg(long)]
        rating: Option<u8>,
        #[arg(long, default_value = "watched")]
        status: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;

    if let Commands::Migrate = cli.command {
        sqlx::migrate!("../../migrations").run(&pool).await.context("migration failed")?;
        println!("{}", "migrations applied".green());
        return Ok(());
    }

    let neutral_rating_weight = config.neutral_rating_weight;
    let store = Arc::new(PgStore::new(pool.clone()));
    let index = Arc::new(PgVectorIndex::new(pool));
    let orchestrator = Orchestrator::new(store.clone(), index, config);

    match cli.command {
        Commands::Migrate => unreachable!("handled above"),
        Commands::Similar { movie_id, k } => handle_similar(&orchestrator, movie_id, k).await?,
        Commands::Recommend { user_id, k } => handle_recommend(&orchestrator, user_id, k).await?,
        Commands::Feed { user_id, k } => handle_feed(&orchestrator, user_id, k).await?,
        Commands::Match { user_id, movie_id } => handle_match(&orchestrator, user_id, movie_id).await?,
        Commands::Next { user_id } => handle_next(&orchestrator, user_id).await?,
        Commands::Rate { user_id, movie_id, rating, status } => {
            handle_rate(&*store, user_id, movie_id, rating, &status, neutral_rating_weight).await?
        }
    }

    Ok(())
}

fn print_movie_line(rank: usize, movie: &Movie, distance: Option<f32>, score: Option<f64>) {
    let genres = movie.genres.iter().cloned().collect::<Vec<_>>().join(", ");
    let mut tail = String::new();
    if let Some(d) = distance {
        tail.push_str(&format!(" dist={d:.3}"));
    }
    if let Some(s) = score {
        tail.push_str(&format!(" score={s:.3}"));
    }
    println!(
        "{}. {} [{}]{}",
        rank.to_string().green(),
        movie.title.bold(),
        genres,
        tail
    );
}

async fn handle_similar(orchestrator: &Orchestrator, movie_id: MovieId, k: usize) -> Result<()> {
    let items = orchestrator.similar(movie_id, k, None).await?;
    println!("{}", format!("Movies similar to {movie_id}:").bold().blue());
    for (i, item) in items.iter().enumerate() {
        print_movie_line(i + 1, &item.movie, Some(item.distance), item.score);
    }
    Ok(())
}

async fn handle_recommend(orchestrator: &Orchestrator, user_id: UserId, k: usize) -> Result<()> {
    let scored = orchestrator.recommendations(user_id, k, None).await?;
    println!("{}", format!("Recommendations for user {user_id}:").bold().blue());
    for (i, s) in scored.iter().enumerate() {
        print_movie_line(i + 1, &s.candidate.movie, Some(s.candidate.distance), Some(s.score));
    }
    Ok(())
}

async fn handle_feed(orchestrator: &Orchestrator, user_id: UserId, k: usize) -> Result<()> {
    let items = orchestrator.feed(user_id, k, None).await?;
    println!("{}", format!("Feed for user {user_id}:").bold().blue());
    for (i, item) in items.iter().enumerate() {
        match item {
            FeedItem::Scored(s) => print_movie_line(i + 1, &s.candidate.movie, Some(s.candidate.distance), Some(s.score)),
            FeedItem::Unscored(movie) => print_movie_line(i + 1, movie, None, None),
        }
    }
    Ok(())
}

async fn handle_match(orchestrator: &Orchestrator, user_id: UserId, movie_id: MovieId) -> Result<()> {
    match orchestrator.match_score(user_id, movie_id, None).await? {
        Some(score) => println!("{}", format!("Match score: {score}/100").bold().green()),
        None => println!("{}", "Not enough data to compute a match score".yellow()),
    }
    Ok(())
}

async fn handle_next(orchestrator: &Orchestrator, user_id: UserId) -> Result<()> {
    match orchestrator.next(user_id, None).await? {
        Some(movie) => print_movie_line(1, &movie, None, None),
        None => println!("{}", "No more movies in the queue".yellow()),
    }
    Ok(())
}

async fn handle_rate(
    store: &(impl Store + ?Sized),
    user_id: UserId,
    movie_id: MovieId,
    rating: Option<u8>,
    status: &str,
    neutral_rating_weight: f32,
) -> Result<()> {
    if let Some(r) = rating {
        if r > 5 {
            return Err(anyhow!("rating must be between 0 and 5, got {r}"));
        }
    }
    let status = RatingStatus::from_str(status).map_err(|e| anyhow!(e.to_string()))?;
    apply_rating(store, user_id, movie_id, rating, status, neutral_rating_weight)
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    println!("{}", "rating recorded".green());
    Ok(())
}
