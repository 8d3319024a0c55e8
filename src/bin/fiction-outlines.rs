//! Fiction Outlines CLI: edit outline, arc and story trees in a local database.
//!
//! Usage:
//!   fiction-outlines outline <subcommand> [--db path]
//!   fiction-outlines arc <subcommand>
//!   fiction-outlines tree show <outline-or-arc-id> [--json]
//!   fiction-outlines node <subcommand>

use clap::{Parser, Subcommand};
use fiction_outlines::{
    Actor, AllowAll, AnnotatedList, ArcId, InsertAction, InstanceId, InstanceKind, MaceType,
    NewNode, NodeId, NodeKind, NodeMutationGateway, NodePayload, NodeUpdate, OpenStore,
    OutlineConfig, OutlineError, OutlineId, Position, SqliteStore,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fiction-outlines",
    version,
    about = "Story-structure trees for fiction outlines"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to YAML configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Name recorded as the acting user
    #[arg(long, global = true, default_value = "local")]
    actor: String,
    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage outlines
    Outline {
        #[command(subcommand)]
        action: OutlineAction,
    },
    /// Manage story arcs
    Arc {
        #[command(subcommand)]
        action: ArcAction,
    },
    /// Manage characters and locations of an outline
    Instance {
        #[command(subcommand)]
        action: InstanceAction,
    },
    /// Show trees
    Tree {
        #[command(subcommand)]
        action: TreeAction,
    },
    /// Edit tree nodes
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
}

#[derive(Subcommand)]
enum OutlineAction {
    /// Create an outline
    Create {
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List all outlines
    List,
    /// Delete an outline with its arcs and trees
    Delete { id: OutlineId },
}

#[derive(Subcommand)]
enum ArcAction {
    /// Create an arc with its milestone skeleton
    Create {
        outline: OutlineId,
        name: String,
        /// milieu, answer, character or event
        #[arg(long, default_value = "character")]
        mace: MaceType,
    },
    /// List the arcs of an outline
    List { outline: OutlineId },
    /// Delete an arc and its tree
    Delete { id: ArcId },
}

#[derive(Subcommand)]
enum InstanceAction {
    /// Add a character or location
    Add {
        outline: OutlineId,
        /// character or location
        kind: String,
        label: String,
    },
    /// List instances of an outline
    List { outline: OutlineId },
}

#[derive(Subcommand)]
enum TreeAction {
    /// Print the story tree of an outline or the beat tree of an arc
    Show {
        /// Outline or arc id
        owner: String,
        /// Nested JSON instead of indented text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum NodeAction {
    /// Add a node relative to an anchor node
    Add {
        anchor: NodeId,
        /// Node type, e.g. chapter, scene or beat
        node_type: String,
        title: String,
        /// first-child, last-child, first-sibling, last-sibling, left or right
        #[arg(long, default_value = "last-child")]
        position: Position,
        #[arg(long)]
        description: Option<String>,
    },
    /// Move a node and its subtree
    Move {
        id: NodeId,
        target: NodeId,
        #[arg(long, default_value = "right")]
        position: Position,
    },
    /// Delete a node and its subtree
    Delete { id: NodeId },
    /// Change the type of a node
    Retype { id: NodeId, node_type: String },
    /// Change the title of a node
    Rename { id: NodeId, title: String },
    /// Replace the characters and locations of a node
    Associate {
        id: NodeId,
        #[arg(long = "character")]
        characters: Vec<InstanceId>,
        #[arg(long = "location")]
        locations: Vec<InstanceId>,
    },
    /// Link an arc node to a story node, or clear the link
    Link {
        id: NodeId,
        story_node: Option<NodeId>,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<OutlineConfig, OutlineError> {
    match path {
        Some(path) => OutlineConfig::load(path),
        None => match OutlineConfig::default_path() {
            Some(path) if path.exists() => OutlineConfig::load(path),
            _ => Ok(OutlineConfig::default()),
        },
    }
}

fn open_gateway(db: Option<PathBuf>, config: Option<PathBuf>) -> Result<NodeMutationGateway, String> {
    let config = load_config(config).map_err(|e| e.to_string())?;
    let db_path = db.unwrap_or_else(|| config.database_path());
    let store = SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    NodeMutationGateway::new(Arc::new(store), Arc::new(AllowAll), &config).map_err(|e| e.to_string())
}

fn report<T>(result: Result<T, OutlineError>, on_ok: impl FnOnce(T)) -> i32 {
    match result {
        Ok(value) => {
            on_ok(value);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

// === Outlines ===

fn cmd_outline_create(gw: &NodeMutationGateway, actor: &Actor, title: &str, description: Option<&str>) -> i32 {
    report(gw.create_outline(actor, title, description), |outline| {
        println!("Created outline '{}' ({})", outline.title, outline.id);
    })
}

fn cmd_outline_list(gw: &NodeMutationGateway, actor: &Actor) -> i32 {
    report(gw.outlines(actor), |outlines| {
        if outlines.is_empty() {
            println!("No outlines defined.");
            return;
        }
        println!("{:<36}  {:<32}  {:>4}", "ID", "TITLE", "ARCS");
        println!("{}", "-".repeat(76));
        for outline in outlines {
            let arcs = gw.arcs_of(actor, &outline.id).map(|a| a.len()).unwrap_or(0);
            println!("{:<36}  {:<32}  {:>4}", outline.id, outline.title, arcs);
        }
    })
}

fn cmd_outline_delete(gw: &NodeMutationGateway, actor: &Actor, id: &OutlineId) -> i32 {
    report(gw.delete_outline(actor, id), |()| {
        println!("Deleted outline {}", id);
    })
}

// === Arcs ===

fn cmd_arc_create(gw: &NodeMutationGateway, actor: &Actor, outline: &OutlineId, name: &str, mace: MaceType) -> i32 {
    report(gw.create_arc(actor, outline, name, mace), |arc| {
        println!("Created {} arc '{}' ({})", arc.mace_type, arc.name, arc.id);
    })
}

fn cmd_arc_list(gw: &NodeMutationGateway, actor: &Actor, outline: &OutlineId) -> i32 {
    report(gw.arcs_of(actor, outline), |arcs| {
        if arcs.is_empty() {
            println!("No arcs defined.");
            return;
        }
        println!("{:<36}  {:<32}  {:<9}", "ID", "NAME", "MACE");
        println!("{}", "-".repeat(81));
        for arc in arcs {
            println!("{:<36}  {:<32}  {:<9}", arc.id, arc.name, arc.mace_type);
        }
    })
}

fn cmd_arc_delete(gw: &NodeMutationGateway, actor: &Actor, id: &ArcId) -> i32 {
    report(gw.delete_arc(actor, id), |()| {
        println!("Deleted arc {}", id);
    })
}

// === Instances ===

fn cmd_instance_add(gw: &NodeMutationGateway, actor: &Actor, outline: &OutlineId, kind: &str, label: &str) -> i32 {
    let Some(kind) = InstanceKind::parse(kind) else {
        eprintln!("Error: kind must be 'character' or 'location', not '{}'", kind);
        return 1;
    };
    report(gw.create_instance(actor, outline, kind, label), |instance| {
        println!("Added {} '{}' ({})", instance.kind, instance.label, instance.id);
    })
}

fn cmd_instance_list(gw: &NodeMutationGateway, actor: &Actor, outline: &OutlineId) -> i32 {
    report(gw.instances_of(actor, outline), |instances| {
        for instance in instances {
            println!("{:<36}  {:<9}  {}", instance.id, instance.kind, instance.label);
        }
    })
}

// === Trees ===

/// Nested `{id, type, title, children}` objects built from preorder depths
fn nest<K: NodeKind>(list: &AnnotatedList<K>) -> Value {
    fn close(stack: &mut Vec<(usize, Value)>, roots: &mut Vec<Value>) {
        if let Some((_, node)) = stack.pop() {
            match stack.last_mut() {
                Some((_, parent)) => {
                    if let Some(children) = parent["children"].as_array_mut() {
                        children.push(node);
                    }
                }
                None => roots.push(node),
            }
        }
    }

    let mut roots = Vec::new();
    let mut stack: Vec<(usize, Value)> = Vec::new();
    for entry in list {
        while stack.last().is_some_and(|(depth, _)| *depth >= entry.depth) {
            close(&mut stack, &mut roots);
        }
        let node = &entry.node;
        stack.push((
            entry.depth,
            json!({
                "id": node.id,
                "type": node.node_type.as_str(),
                "title": node.payload.title,
                "description": node.payload.description,
                "characters": node.payload.characters,
                "locations": node.payload.locations,
                "story_node": node.payload.story_node,
                "children": [],
            }),
        ));
    }
    while !stack.is_empty() {
        close(&mut stack, &mut roots);
    }
    Value::Array(roots)
}

fn print_tree<K: NodeKind>(list: &AnnotatedList<K>, as_json: bool) {
    if as_json {
        match serde_json::to_string_pretty(&nest(list)) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
        return;
    }
    for entry in list {
        let node = &entry.node;
        println!(
            "{}{:<14} {}  ({})",
            "  ".repeat(entry.depth),
            node.node_type.as_str(),
            node.payload.title.as_deref().unwrap_or(""),
            node.id
        );
    }
}

fn cmd_tree_show(gw: &NodeMutationGateway, actor: &Actor, owner: &str, as_json: bool) -> i32 {
    if let Ok(outline) = owner.parse::<OutlineId>() {
        match gw.story_structure(actor, &outline) {
            Ok(list) => {
                print_tree(&list, as_json);
                return 0;
            }
            Err(OutlineError::NotFound { .. }) => {}
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    }
    match owner.parse::<ArcId>() {
        Ok(arc) => report(gw.arc_structure(actor, &arc), |list| print_tree(&list, as_json)),
        Err(e) => {
            eprintln!("Error: '{}' is not an id: {}", owner, e);
            1
        }
    }
}

// === Nodes ===

fn cmd_node_add(
    gw: &NodeMutationGateway,
    actor: &Actor,
    anchor: &NodeId,
    node_type: &str,
    title: &str,
    position: Position,
    description: Option<String>,
) -> i32 {
    let action = if position.is_child() {
        InsertAction::AddChild
    } else {
        InsertAction::AddSibling
    };
    let mut payload = NodePayload::titled(title);
    payload.description = description;
    let new = NewNode::new(node_type, payload);
    report(gw.create_node(actor, anchor, action, position, &new), |node| {
        println!("Added {} ({}) at {}", node.type_name(), node.id(), node.path());
    })
}

fn cmd_node_move(gw: &NodeMutationGateway, actor: &Actor, id: &NodeId, target: &NodeId, position: Position) -> i32 {
    report(gw.move_node(actor, id, target, position), |node| {
        println!("Moved {} to {}", node.id(), node.path());
    })
}

fn cmd_node_delete(gw: &NodeMutationGateway, actor: &Actor, id: &NodeId) -> i32 {
    report(gw.delete_node(actor, id), |()| {
        println!("Deleted node {} and its subtree", id);
    })
}

fn cmd_node_retype(gw: &NodeMutationGateway, actor: &Actor, id: &NodeId, node_type: &str) -> i32 {
    report(gw.retype_node(actor, id, node_type), |node| {
        println!("Node {} is now a {}", node.id(), node.type_name());
    })
}

fn cmd_node_rename(gw: &NodeMutationGateway, actor: &Actor, id: &NodeId, title: &str) -> i32 {
    let update = NodeUpdate {
        title: Some(title.to_string()),
        description: None,
    };
    report(gw.update_node(actor, id, &update), |node| {
        println!("Renamed {} to '{}'", node.id(), title);
    })
}

fn cmd_node_associate(
    gw: &NodeMutationGateway,
    actor: &Actor,
    id: &NodeId,
    characters: Vec<InstanceId>,
    locations: Vec<InstanceId>,
) -> i32 {
    let characters: BTreeSet<InstanceId> = characters.into_iter().collect();
    let locations: BTreeSet<InstanceId> = locations.into_iter().collect();
    report(gw.set_associations(actor, id, characters, locations), |node| {
        println!(
            "Node {} has {} characters and {} locations",
            node.id(),
            node.payload().characters.len(),
            node.payload().locations.len()
        );
    })
}

fn cmd_node_link(gw: &NodeMutationGateway, actor: &Actor, id: &NodeId, story_node: Option<NodeId>) -> i32 {
    report(gw.link_story_node(actor, id, story_node), |node| match node.payload.story_node {
        Some(story) => println!("Linked {} to story node {}", node.id, story),
        None => println!("Cleared story link of {}", node.id),
    })
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let gw = match open_gateway(cli.db, cli.config) {
        Ok(gw) => gw,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let actor = Actor::new(cli.actor);

    let code = match cli.command {
        Commands::Outline { action } => match action {
            OutlineAction::Create { title, description } => {
                cmd_outline_create(&gw, &actor, &title, description.as_deref())
            }
            OutlineAction::List => cmd_outline_list(&gw, &actor),
            OutlineAction::Delete { id } => cmd_outline_delete(&gw, &actor, &id),
        },
        Commands::Arc { action } => match action {
            ArcAction::Create { outline, name, mace } => cmd_arc_create(&gw, &actor, &outline, &name, mace),
            ArcAction::List { outline } => cmd_arc_list(&gw, &actor, &outline),
            ArcAction::Delete { id } => cmd_arc_delete(&gw, &actor, &id),
        },
        Commands::Instance { action } => match action {
            InstanceAction::Add { outline, kind, label } => {
                cmd_instance_add(&gw, &actor, &outline, &kind, &label)
            }
            InstanceAction::List { outline } => cmd_instance_list(&gw, &actor, &outline),
        },
        Commands::Tree { action } => match action {
            TreeAction::Show { owner, json } => cmd_tree_show(&gw, &actor, &owner, json),
        },
        Commands::Node { action } => match action {
            NodeAction::Add {
                anchor,
                node_type,
                title,
                position,
                description,
            } => cmd_node_add(&gw, &actor, &anchor, &node_type, &title, position, description),
            NodeAction::Move { id, target, position } => cmd_node_move(&gw, &actor, &id, &target, position),
            NodeAction::Delete { id } => cmd_node_delete(&gw, &actor, &id),
            NodeAction::Retype { id, node_type } => cmd_node_retype(&gw, &actor, &id, &node_type),
            NodeAction::Rename { id, title } => cmd_node_rename(&gw, &actor, &id, &title),
            NodeAction::Associate {
                id,
                characters,
                locations,
            } => cmd_node_associate(&gw, &actor, &id, characters, locations),
            NodeAction::Link { id, story_node } => cmd_node_link(&gw, &actor, &id, story_node),
        },
    };
    std::process::exit(code);
}
