//! CLI entry point for inspecting a file-backed graph store.
//!
//! Every command prints JSON to stdout; logs go to stderr.

use std::collections::BTreeMap;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use graph::{Direction, ElementId, ElementKind, Graph, GraphSettings, ReadPredicate, Traversal};

#[derive(Parser)]
#[command(name = "graph-inspect")]
#[command(about = "Inspect a Graph object store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file prefix (default: graph).
    #[arg(short, long, default_value = "graph", global = true)]
    config: String,

    /// Store path, overriding the configured one.
    #[arg(long, global = true)]
    store: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Element counts by kind and type tag.
    Stats,
    /// List elements matching the given filters.
    List {
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Type tag.
        #[arg(long = "type")]
        type_tag: Option<String>,
        /// Required group; repeatable.
        #[arg(long)]
        group: Vec<String>,
    },
    /// Print one element.
    Show {
        /// Element ID.
        id: String,
    },
    /// Breadth-first walk over relationships from an entity.
    Traverse {
        /// Start entity ID.
        id: String,
        /// Only follow relationships with this type tag.
        #[arg(long = "type")]
        relationship_type: Option<String>,
        #[arg(long, value_enum, default_value = "outgoing")]
        direction: DirectionArg,
        #[arg(long)]
        max_depth: Option<usize>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Entity,
    Relationship,
    Action,
}

impl From<KindArg> for ElementKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Entity => ElementKind::Entity,
            KindArg::Relationship => ElementKind::Relationship,
            KindArg::Action => ElementKind::Action,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Outgoing,
    Incoming,
    Both,
}

impl From<DirectionArg> for Direction {
    fn from(direction: DirectionArg) -> Self {
        match direction {
            DirectionArg::Outgoing => Direction::Outgoing,
            DirectionArg::Incoming => Direction::Incoming,
            DirectionArg::Both => Direction::Both,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let mut settings = GraphSettings::load(&cli.config)?;
    if let Some(store) = cli.store {
        settings.store_path = store;
    }

    let graph = Graph::open(settings)?;
    let query = graph.query();

    match cli.command {
        Command::Stats => {
            let mut by_kind: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
            for element in query.fetch(&ReadPredicate::any())? {
                *by_kind
                    .entry(element.kind().to_string())
                    .or_default()
                    .entry(element.type_tag().to_string())
                    .or_default() += 1;
            }
            println!("{}", serde_json::to_string_pretty(&by_kind)?);
        }
        Command::List {
            kind,
            type_tag,
            group,
        } => {
            let mut predicate = ReadPredicate::any();
            if let Some(kind) = kind {
                predicate = predicate.kind(kind.into());
            }
            if let Some(tag) = &type_tag {
                predicate = predicate.of_type(tag);
            }
            for g in &group {
                predicate = predicate.in_group(g);
            }
            let elements = query.fetch(&predicate)?;
            println!("{}", serde_json::to_string_pretty(&elements)?);
        }
        Command::Show { id } => {
            let id = parse_id(&id)?;
            let element = query
                .get(id)?
                .ok_or_else(|| anyhow::anyhow!("no element with id {id}"))?;
            println!("{}", serde_json::to_string_pretty(&element)?);
        }
        Command::Traverse {
            id,
            relationship_type,
            direction,
            max_depth,
        } => {
            let start = parse_id(&id)?;
            let traversal = Traversal {
                relationship_type,
                direction: direction.into(),
                max_depth,
            };
            let reached: Vec<serde_json::Value> = query
                .traverse(start, &traversal)?
                .into_iter()
                .map(|r| {
                    serde_json::json!({
                        "id": r.entity.id(),
                        "type": r.entity.type_tag(),
                        "depth": r.depth,
                        "via": r.via,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&reached)?);
        }
    }

    Ok(())
}

fn parse_id(raw: &str) -> anyhow::Result<ElementId> {
    let uuid = uuid::Uuid::parse_str(raw)?;
    Ok(ElementId(uuid))
}
