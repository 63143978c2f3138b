use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use reqtree_core::Theme;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Hierarchical requirements with typed codes and cross-references")]
pub struct Cli {
    /// Path to the requirements database
    #[clap(long, global = true)]
    pub db: Option<PathBuf>,

    /// Path to the settings file
    #[clap(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Permit changes to engine-managed fields (type, path, parent) and to types
    #[clap(long = "override", global = true)]
    pub override_mode: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    /// Self-contained HTML snapshot
    Html,
    /// Full snapshot as pretty JSON
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database if needed, or wipe it back to the defaults
    Init {
        /// Delete every requirement, type and status and re-seed
        #[clap(long)]
        reset: bool,

        /// Skip the reset confirmation
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Add a new requirement
    Add {
        /// Title of the requirement
        #[clap(long)]
        title: Option<String>,

        /// Type code (e.g. CORE, F, M)
        #[clap(long, short = 't')]
        r#type: Option<String>,

        /// Parent requirement (code or #id)
        #[clap(long)]
        parent: Option<String>,

        /// Markdown description
        #[clap(long)]
        description: Option<String>,

        /// Markdown rationale
        #[clap(long)]
        rationale: Option<String>,

        /// Status name (defaults to the first status)
        #[clap(long)]
        status: Option<String>,

        /// Cosmetic display code
        #[clap(long)]
        display: Option<String>,

        /// Free-text provenance
        #[clap(long)]
        source: Option<String>,

        /// Explicit num_path (requires --override)
        #[clap(long)]
        path: Option<String>,

        /// Use interactive mode (prompts)
        #[clap(long, short = 'i')]
        interactive: bool,
    },

    /// List requirements in tree order
    List {
        /// Only show this type code
        #[clap(long, short = 't')]
        r#type: Option<String>,

        /// Only show this status
        #[clap(long)]
        status: Option<String>,
    },

    /// Print the requirement tree
    Tree {
        /// Only print the subtrees under these requirements
        #[clap(long)]
        root: Vec<String>,

        /// Show only the top level
        #[clap(long)]
        collapsed: bool,

        /// Reveal and highlight this requirement
        #[clap(long)]
        select: Option<String>,
    },

    /// Show details for a requirement
    Show {
        /// Code (e.g. F0.1) or #id
        id: String,
    },

    /// Edit an existing requirement
    Edit {
        /// Code (e.g. F0.1) or #id
        id: String,

        #[clap(long)]
        title: Option<String>,

        #[clap(long)]
        description: Option<String>,

        #[clap(long)]
        rationale: Option<String>,

        #[clap(long)]
        status: Option<String>,

        #[clap(long)]
        display: Option<String>,

        #[clap(long)]
        source: Option<String>,

        /// New type code (requires --override)
        #[clap(long, short = 't')]
        r#type: Option<String>,

        /// New num_path (requires --override)
        #[clap(long)]
        path: Option<String>,

        /// New parent, code or #id (requires --override)
        #[clap(long, conflicts_with = "make_root")]
        parent: Option<String>,

        /// Detach from the parent (requires --override)
        #[clap(long = "root")]
        make_root: bool,

        /// Edit the description in an editor
        #[clap(long, short = 'i')]
        interactive: bool,
    },

    /// Delete a requirement and everything below it
    Del {
        /// Code (e.g. F0.1) or #id
        id: String,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Swap a requirement with its previous sibling
    Up {
        id: String,
    },

    /// Swap a requirement with its next sibling
    Down {
        id: String,
    },

    /// Move a requirement within its sibling group
    Move {
        /// Requirement to move
        id: String,

        /// Take the place of this sibling
        #[clap(long, conflicts_with = "position")]
        onto: Option<String>,

        /// Zero-based position in the sibling group
        #[clap(long)]
        position: Option<usize>,
    },

    /// Print the path the next requirement would receive
    NextPath {
        /// Type code
        #[clap(long, short = 't')]
        r#type: String,

        /// Parent requirement (code or #id)
        #[clap(long)]
        parent: Option<String>,
    },

    /// Resolve the codes referenced in a piece of text
    Refs {
        text: String,
    },

    /// Suggest codes completing the one typed at the end of the text
    Suggest {
        text: String,

        /// Maximum number of suggestions
        #[clap(long, default_value_t = reqtree_core::SUGGESTION_LIMIT)]
        limit: usize,
    },

    /// Export a snapshot of the tree
    Export {
        #[clap(long, value_enum, default_value = "html")]
        format: ExportFormat,

        /// Version label shown in the HTML header
        #[clap(long)]
        version: Option<String>,

        /// Color scheme (light or dark)
        #[clap(long)]
        theme: Option<Theme>,

        /// Only export the subtrees under these requirements
        #[clap(long)]
        root: Vec<String>,

        /// Output file (stdout when omitted)
        #[clap(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Manage requirement types
    #[clap(subcommand)]
    Type(TypeCommand),

    /// Manage statuses
    #[clap(subcommand)]
    Status(StatusCommand),

    /// Database files and metadata
    #[clap(subcommand)]
    Db(DbCommand),

    /// User settings
    #[clap(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum TypeCommand {
    /// Add a type (requires --override)
    Add {
        /// Uppercase letters, e.g. SW
        code: String,

        #[clap(long)]
        name: Option<String>,

        #[clap(long)]
        color: Option<String>,

        #[clap(long)]
        icon: Option<String>,
    },

    /// List all types
    List,

    /// Edit a type (requires --override)
    Edit {
        code: String,

        #[clap(long)]
        new_code: Option<String>,

        #[clap(long)]
        name: Option<String>,

        #[clap(long)]
        color: Option<String>,

        #[clap(long)]
        icon: Option<String>,

        #[clap(long)]
        order: Option<i64>,
    },

    /// Delete an unused type (requires --override)
    Del {
        code: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum StatusCommand {
    /// Add a status
    Add {
        name: String,

        /// Badge color, e.g. #1f9d55
        #[clap(long)]
        color: Option<String>,
    },

    /// List all statuses
    List,

    /// Edit a status
    Edit {
        name: String,

        #[clap(long)]
        new_name: Option<String>,

        #[clap(long)]
        color: Option<String>,

        #[clap(long)]
        order: Option<i64>,
    },

    /// Delete an unused status
    Del {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Print the database path in use
    Path,

    /// Show record counts and the schema version
    Info,

    /// Replace the working database with a .ReqDB file
    Import {
        file: PathBuf,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Save a copy of the working database (.ReqDB is appended)
    SaveAs {
        target: PathBuf,
    },

    /// Load a JSON snapshot, replacing all contents
    ImportJson {
        file: PathBuf,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Show or set the requirement-set version label
    Version {
        value: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the current settings
    Show,

    /// Change settings
    Set {
        #[clap(long)]
        theme: Option<Theme>,

        /// Database used when no --db or REQTREE_DB is given
        #[clap(long)]
        default_db: Option<PathBuf>,
    },
}
