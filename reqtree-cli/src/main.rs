mod cli;
mod prompts;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use colored::{ColoredString, Colorize};
use log::{debug, warn};
use std::path::{Path, PathBuf};

use reqtree_core::db::{
    export_to_json, import_database, import_from_json, load_snapshot, save_database_copy,
};
use reqtree_core::{
    resolve_db_path, Direction, NewRequirement, ReqError, RenderMode, Rendered,
    RequirementChanges, RequirementEngine, RequirementId, RootSet, Segment, Settings,
    SqliteBackend, StaticOptions, StatusFields, StatusId, TreeStore, TypeFields, TypeId,
    WriteLock,
};

use crate::cli::{Cli, Command, ConfigCommand, DbCommand, ExportFormat, StatusCommand, TypeCommand};

/// Attempts at numbering a new requirement before giving up on collisions
const CREATE_ATTEMPTS: usize = 3;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings_path = match &cli.settings {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    let mut settings = Settings::load(&settings_path);

    // Settings commands never touch the database
    if let Command::Config(config_cmd) = &cli.command {
        return handle_config_command(config_cmd, &mut settings, &settings_path);
    }

    let db_path = resolve_db_path(cli.db.as_deref(), &settings)?;
    debug!("Using database {}", db_path.display());

    let _lock = if is_mutating(&cli.command) {
        Some(
            WriteLock::acquire(&db_path)
                .with_context(|| format!("Another process is writing {}", db_path.display()))?,
        )
    } else {
        None
    };

    // File-level database operations bypass the engine
    if let Command::Db(db_cmd) = &cli.command {
        match db_cmd {
            DbCommand::Import { file, yes } => return import_db_file(&db_path, file, *yes),
            DbCommand::SaveAs { target } => return save_db_copy(&db_path, target),
            DbCommand::Path => {
                println!("{}", db_path.display());
                return Ok(());
            }
            _ => {}
        }
    }

    let engine = RequirementEngine::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let override_mode = cli.override_mode;

    match &cli.command {
        Command::Init { reset, yes } => {
            init_database(&engine, &db_path, *reset, *yes)?;
        }
        Command::Add {
            title,
            r#type,
            parent,
            description,
            rationale,
            status,
            display,
            source,
            path,
            interactive,
        } => {
            let tree = engine.tree()?;
            let new = if *interactive || title.is_none() {
                prompts::prompt_new_requirement(&tree)?
            } else {
                build_new_requirement(
                    &tree,
                    title,
                    r#type,
                    parent,
                    description,
                    rationale,
                    status,
                    display,
                    source,
                    path,
                )?
            };
            add_requirement(&engine, new, override_mode)?;
        }
        Command::List { r#type, status } => {
            list_requirements(&engine, r#type, status)?;
        }
        Command::Tree {
            root,
            collapsed,
            select,
        } => {
            print_tree(&engine, root, *collapsed, select.as_deref())?;
        }
        Command::Show { id } => {
            show_requirement(&engine, id)?;
        }
        Command::Edit {
            id,
            title,
            description,
            rationale,
            status,
            display,
            source,
            r#type,
            path,
            parent,
            make_root,
            interactive,
        } => {
            let tree = engine.tree()?;
            let req_id = resolve_requirement(&tree, id)?;
            let mut changes = RequirementChanges {
                title: title.clone(),
                description_md: description.clone(),
                ..Default::default()
            };
            if *interactive {
                let current = tree.get(req_id).map(|r| r.description_md.as_str());
                changes.description_md =
                    Some(prompts::prompt_description(current.unwrap_or_default())?);
            }
            changes.rationale_md = rationale.as_deref().map(optional_text);
            changes.display_code = display.as_deref().map(optional_text);
            changes.source = source.as_deref().map(optional_text);
            if let Some(name) = status {
                changes.status_id = Some(resolve_status(&tree, name)?);
            }
            if let Some(code) = r#type {
                changes.type_id = Some(resolve_type(&tree, code)?);
            }
            changes.num_path = path.clone();
            if let Some(parent) = parent {
                changes.parent_id = Some(Some(resolve_requirement(&tree, parent)?));
            } else if *make_root {
                changes.parent_id = Some(None);
            }

            if changes.is_empty() {
                println!("{}", "No changes given.".yellow());
                return Ok(());
            }
            engine_result(engine.update_requirement(req_id, &changes, override_mode))?;
            println!("{}", "Requirement updated successfully!".green());
            if let Some(label) = engine.tree()?.label_of(req_id) {
                println!("Code: {}", label.green());
            }
        }
        Command::Del { id, yes } => {
            delete_requirement(&engine, id, *yes)?;
        }
        Command::Up { id } => {
            reorder_requirement(&engine, id, Direction::Up)?;
        }
        Command::Down { id } => {
            reorder_requirement(&engine, id, Direction::Down)?;
        }
        Command::Move { id, onto, position } => {
            move_requirement(&engine, id, onto.as_deref(), *position)?;
        }
        Command::NextPath { r#type, parent } => {
            let tree = engine.tree()?;
            let type_id = resolve_type(&tree, r#type)?;
            let parent_id = parent
                .as_deref()
                .map(|p| resolve_requirement(&tree, p))
                .transpose()?;
            let path = engine.compute_next_path(parent_id, type_id)?;
            println!("{}{}", r#type, path);
        }
        Command::Refs { text } => {
            let segments = engine.resolve_references(text)?;
            println!("{}", format_segments(&segments));
            let codes: Vec<&str> = segments
                .iter()
                .filter(|s| s.is_code())
                .map(Segment::as_str)
                .collect();
            if codes.is_empty() {
                println!("{}", "No references found.".yellow());
            } else {
                println!("{}: {}", "References".blue(), codes.join(", "));
            }
        }
        Command::Suggest { text, limit } => {
            let suggestions = engine.suggest_codes(text, *limit)?;
            if suggestions.is_empty() {
                println!("{}", "No suggestions.".yellow());
            }
            for code in suggestions {
                println!("{}", code.green());
            }
        }
        Command::Export {
            format,
            version,
            theme,
            root,
            output,
        } => match format {
            ExportFormat::Html => {
                let options = ExportOptions {
                    version: version.clone(),
                    theme: *theme,
                    roots: root,
                    output: output.as_deref(),
                };
                export_html(&engine, &options, &mut settings, &settings_path)?;
            }
            ExportFormat::Json => export_json(&engine, output.as_deref())?,
        },
        Command::Type(type_cmd) => {
            handle_type_command(type_cmd, &engine, override_mode)?;
        }
        Command::Status(status_cmd) => {
            handle_status_command(status_cmd, &engine)?;
        }
        Command::Db(db_cmd) => {
            handle_db_command(db_cmd, &engine, &db_path)?;
        }
        // Handled before the database is opened
        Command::Config(_) => {}
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    match verbose {
        0 => {}
        1 => {
            builder.filter_level(log::LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
        }
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn is_mutating(command: &Command) -> bool {
    match command {
        Command::Init { .. }
        | Command::Add { .. }
        | Command::Edit { .. }
        | Command::Del { .. }
        | Command::Up { .. }
        | Command::Down { .. }
        | Command::Move { .. } => true,
        Command::Type(cmd) => !matches!(cmd, TypeCommand::List),
        Command::Status(cmd) => !matches!(cmd, StatusCommand::List),
        Command::Db(cmd) => matches!(
            cmd,
            DbCommand::Import { .. } | DbCommand::ImportJson { .. } | DbCommand::Version { value: Some(_) }
        ),
        _ => false,
    }
}

/// Adds a hint to errors the user can fix with a flag
fn engine_result<T>(result: reqtree_core::Result<T>) -> Result<T> {
    result.map_err(|e| match e {
        ReqError::OverrideRequired(_) => anyhow!("{} (re-run with --override)", e),
        ReqError::CrossParentMoveUnsupported { .. } => {
            anyhow!("{} (use `edit --parent --override` to reparent)", e)
        }
        other => other.into(),
    })
}

/// Empty text clears an optional field
fn optional_text(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

// =============================================================================
// Lookups
// =============================================================================

/// Accepts a code (`F0.1`) or a database id (`#12`)
fn resolve_requirement(tree: &TreeStore, key: &str) -> Result<RequirementId> {
    if let Some(raw) = key.strip_prefix('#') {
        let id: RequirementId = raw
            .parse()
            .with_context(|| format!("Invalid requirement id: {}", key))?;
        if !tree.contains(id) {
            bail!("Requirement {} not found", key);
        }
        return Ok(id);
    }
    tree.find_by_code(key)
        .map(|r| r.id)
        .with_context(|| format!("Requirement {} not found", key))
}

fn resolve_roots(tree: &TreeStore, keys: &[String]) -> Result<RootSet> {
    if keys.is_empty() {
        return Ok(RootSet::All);
    }
    let ids = keys
        .iter()
        .map(|key| resolve_requirement(tree, key))
        .collect::<Result<Vec<_>>>()?;
    Ok(RootSet::Subtrees(ids))
}

fn resolve_type(tree: &TreeStore, code: &str) -> Result<TypeId> {
    tree.type_by_code(code)
        .map(|t| t.id)
        .with_context(|| format!("Unknown type code: {}", code))
}

fn resolve_status(tree: &TreeStore, name: &str) -> Result<StatusId> {
    tree.status_by_name(name)
        .map(|s| s.id)
        .with_context(|| format!("Unknown status: {}", name))
}

// =============================================================================
// Presentation helpers
// =============================================================================

fn badge(name: &str, color: Option<&str>) -> ColoredString {
    match color.and_then(parse_hex_color) {
        Some((r, g, b)) => name.truecolor(r, g, b),
        None => name.normal(),
    }
}

fn parse_hex_color(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let value = u32::from_str_radix(hex, 16).ok()?;
    Some(((value >> 16) as u8, (value >> 8) as u8, value as u8))
}

fn status_badge(tree: &TreeStore, status_id: StatusId) -> ColoredString {
    match tree.status_by_id(status_id) {
        Some(status) => badge(&status.name, status.color.as_deref()),
        None => "Unknown".red(),
    }
}

/// Codes are highlighted, inline code is dimmed
fn format_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| match segment {
            Segment::Text(text) => text.normal().to_string(),
            Segment::Code(code) => code.cyan().underline().to_string(),
            Segment::Verbatim(text) => text.dimmed().to_string(),
        })
        .collect()
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

// =============================================================================
// Requirements
// =============================================================================

fn init_database(engine: &RequirementEngine, db_path: &Path, reset: bool, yes: bool) -> Result<()> {
    if reset {
        if !yes
            && !prompts::confirm("Delete every requirement, type and status and re-seed defaults?")?
        {
            println!("{}", "Reset cancelled.".yellow());
            return Ok(());
        }
        engine.reset()?;
        println!("{} Database reset to defaults.", "✓".green());
    }

    let stats = engine.store().stats()?;
    println!("Database ready at {}", db_path.display().to_string().green());
    println!(
        "  {} requirements, {} types, {} statuses",
        stats.requirement_count, stats.type_count, stats.status_count
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_new_requirement(
    tree: &TreeStore,
    title: &Option<String>,
    type_code: &Option<String>,
    parent: &Option<String>,
    description: &Option<String>,
    rationale: &Option<String>,
    status: &Option<String>,
    display: &Option<String>,
    source: &Option<String>,
    path: &Option<String>,
) -> Result<NewRequirement> {
    let title = match title {
        Some(t) => t.clone(),
        None => bail!("Title is required. Use --title to specify a title."),
    };
    let type_code = match type_code {
        Some(t) => t,
        None => bail!("Type is required. Use --type with one of the type codes."),
    };

    let mut new = NewRequirement::new(resolve_type(tree, type_code)?, title)
        .with_description(description.clone().unwrap_or_default());
    if let Some(parent) = parent {
        new = new.under(resolve_requirement(tree, parent)?);
    }
    if let Some(status) = status {
        new.status_id = Some(resolve_status(tree, status)?);
    }
    new.rationale_md = rationale.as_deref().and_then(optional_text);
    new.display_code = display.as_deref().and_then(optional_text);
    new.source = source.as_deref().and_then(optional_text);
    new.num_path = path.clone();
    Ok(new)
}

/// Creates the requirement, renumbering when another writer took the
/// computed path first
fn add_requirement(
    engine: &RequirementEngine,
    new: NewRequirement,
    override_mode: bool,
) -> Result<()> {
    let mut attempt = 1;
    let id = loop {
        match engine.create_requirement(new.clone(), override_mode) {
            Err(e) if e.is_duplicate_code() && new.num_path.is_none() && attempt < CREATE_ATTEMPTS => {
                warn!("Path collision on attempt {}, renumbering", attempt);
                attempt += 1;
            }
            other => break engine_result(other)?,
        }
    };

    println!("{}", "Requirement added successfully!".green());
    if let Some(label) = engine.tree()?.label_of(id) {
        println!("Code: {}", label.green());
    }
    Ok(())
}

fn list_requirements(
    engine: &RequirementEngine,
    type_filter: &Option<String>,
    status_filter: &Option<String>,
) -> Result<()> {
    let tree = engine.tree()?;
    let type_id = type_filter
        .as_deref()
        .map(|code| resolve_type(&tree, code))
        .transpose()?;
    let status_id = status_filter
        .as_deref()
        .map(|name| resolve_status(&tree, name))
        .transpose()?;

    let rows: Vec<_> = tree
        .iter_preorder()
        .into_iter()
        .filter(|req| type_id.map_or(true, |id| req.type_id == id))
        .filter(|req| status_id.map_or(true, |id| req.status_id == id))
        .collect();

    if rows.is_empty() {
        println!("{}", "No requirements found.".yellow());
        return Ok(());
    }

    for req in rows {
        let indent = "  ".repeat(tree.ancestors(req.id).len());
        let label = tree.label_of(req.id).unwrap_or_default();
        println!(
            "{}{} {} [{}]",
            indent,
            label.bold(),
            req.title,
            status_badge(&tree, req.status_id)
        );
    }
    Ok(())
}

fn print_tree(
    engine: &RequirementEngine,
    roots: &[String],
    collapsed: bool,
    select: Option<&str>,
) -> Result<()> {
    let tree = engine.tree()?;
    let roots = resolve_roots(&tree, roots)?;
    let mut view = match engine.render_tree(&roots, &RenderMode::Interactive)? {
        Rendered::Interactive(view) => view,
        Rendered::Static(_) => bail!("Expected an interactive view"),
    };

    if !collapsed {
        view.expand_all();
    }
    if let Some(code) = select {
        if view.navigate(code).is_none() {
            println!("{} {} is not in this tree.", "!".yellow(), code);
        }
    }

    let rows = view.visible_rows();
    if rows.is_empty() {
        println!("{}", "No requirements found.".yellow());
        return Ok(());
    }
    for row in rows {
        let marker = match (row.has_children, row.expanded) {
            (true, true) => "▾",
            (true, false) => "▸",
            (false, _) => " ",
        };
        let label = if row.selected {
            row.label.black().on_yellow()
        } else {
            row.label.bold()
        };
        let color = view.node(row.id).map(|n| n.status.color.clone());
        println!(
            "{}{} {} {} [{}]",
            "  ".repeat(row.depth),
            marker,
            label,
            row.title,
            badge(&row.status, color.as_deref())
        );
    }
    Ok(())
}

fn show_requirement(engine: &RequirementEngine, key: &str) -> Result<()> {
    let tree = engine.tree()?;
    let id = resolve_requirement(&tree, key)?;
    let req = tree.get(id).context("Requirement not found")?;
    let codes = tree.code_set();

    println!("{}: #{}", "ID".blue(), req.id);
    println!("{}: {}", "Code".blue(), tree.code_of(id).unwrap_or_default());
    if let Some(display) = &req.display_code {
        println!("{}: {}", "Display".blue(), display);
    }
    println!("{}: {}", "Title".blue(), req.title);
    if let Some(t) = tree.type_by_id(req.type_id) {
        println!("{}: {} ({})", "Type".blue(), t.name, t.type_code);
    }
    println!("{}: {}", "Status".blue(), status_badge(&tree, req.status_id));
    let parent = req
        .parent_id
        .and_then(|p| tree.label_of(p))
        .unwrap_or_else(|| "none".to_string());
    println!("{}: {}", "Parent".blue(), parent);
    if let Some(source) = &req.source {
        println!("{}: {}", "Source".blue(), source);
    }
    println!("{}: {}", "Created".blue(), format_time(&req.created_at));
    println!("{}: {}", "Updated".blue(), format_time(&req.updated_at));

    let description = reqtree_core::resolve_references(&req.description_md, &codes);
    println!("\n{}:", "Description".green());
    println!("{}", format_segments(&description));

    if let Some(rationale) = &req.rationale_md {
        println!("\n{}:", "Rationale".green());
        println!(
            "{}",
            format_segments(&reqtree_core::resolve_references(rationale, &codes))
        );
    }

    let children = tree.children(Some(id));
    if !children.is_empty() {
        println!("\n{}:", "Children".green());
        for child in children {
            println!(
                "  {} {}",
                tree.label_of(child.id).unwrap_or_default().yellow(),
                child.title
            );
        }
    }
    Ok(())
}

fn delete_requirement(engine: &RequirementEngine, key: &str, skip_confirm: bool) -> Result<()> {
    let tree = engine.tree()?;
    let id = resolve_requirement(&tree, key)?;
    let req = tree.get(id).context("Requirement not found")?;
    let below = tree.subtree_size(id).saturating_sub(1);

    println!("{}", "Requirement to delete:".yellow());
    println!(
        "  {} {}",
        tree.label_of(id).unwrap_or_default().bold(),
        req.title
    );
    if below > 0 {
        println!(
            "  {} {} requirement(s) below it will also be deleted",
            "!".red(),
            below
        );
    }

    // Confirm deletion unless --yes flag is used
    if !skip_confirm && !prompts::confirm("Are you sure you want to delete this requirement?")? {
        println!("{}", "Deletion cancelled.".yellow());
        return Ok(());
    }

    let removed = engine.delete_requirement(id)?;
    println!(
        "{} Deleted {} requirement(s).",
        "✓".green(),
        removed
    );
    Ok(())
}

fn reorder_requirement(engine: &RequirementEngine, key: &str, direction: Direction) -> Result<()> {
    let tree = engine.tree()?;
    let id = resolve_requirement(&tree, key)?;
    if engine.reorder(id, direction)? {
        println!("{} Moved {} {:?}.", "✓".green(), key, direction);
    } else {
        let end = match direction {
            Direction::Up => "first",
            Direction::Down => "last",
        };
        println!("{} {} is already {} among its siblings.", "!".yellow(), key, end);
    }
    Ok(())
}

fn move_requirement(
    engine: &RequirementEngine,
    key: &str,
    onto: Option<&str>,
    position: Option<usize>,
) -> Result<()> {
    let tree = engine.tree()?;
    let id = resolve_requirement(&tree, key)?;
    match (onto, position) {
        (Some(target), _) => {
            let target_id = resolve_requirement(&tree, target)?;
            engine_result(engine.move_onto(id, target_id))?;
            println!("{} Moved {} to the place of {}.", "✓".green(), key, target);
        }
        (None, Some(position)) => {
            engine_result(engine.move_requirement(id, id, position))?;
            println!("{} Moved {} to position {}.", "✓".green(), key, position);
        }
        (None, None) => bail!("Give --onto <CODE> or --position <N>."),
    }
    Ok(())
}

// =============================================================================
// Export
// =============================================================================

struct ExportOptions<'a> {
    version: Option<String>,
    theme: Option<reqtree_core::Theme>,
    roots: &'a [String],
    output: Option<&'a Path>,
}

fn export_html(
    engine: &RequirementEngine,
    options: &ExportOptions<'_>,
    settings: &mut Settings,
    settings_path: &Path,
) -> Result<()> {
    let version = match &options.version {
        Some(v) => v.trim().to_string(),
        None => prompts::prompt_version(settings.last_snapshot_version.as_deref())
            .context("A snapshot version is required. Use --version to give one.")?,
    };
    if version.is_empty() {
        bail!("A snapshot version is required. Use --version to give one.");
    }

    let tree = engine.tree()?;
    let roots = resolve_roots(&tree, options.roots)?;
    let static_options =
        StaticOptions::new(version.clone()).with_theme(options.theme.unwrap_or(settings.theme));
    let document = match engine.render_tree(&roots, &RenderMode::Static(static_options))? {
        Rendered::Static(document) => document,
        Rendered::Interactive(_) => bail!("Expected a static document"),
    };

    match options.output {
        Some(path) => {
            document
                .write_to(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{} Exported {} links to {}",
                "✓".green(),
                document.link_pairs().len(),
                path.display()
            );
        }
        None => print!("{}", document.html()),
    }

    settings.last_snapshot_version = Some(version);
    if let Err(e) = settings.save(settings_path) {
        warn!("Could not remember snapshot version: {}", e);
    }
    Ok(())
}

fn export_json(engine: &RequirementEngine, output: Option<&Path>) -> Result<()> {
    let snapshot = engine.snapshot()?;
    match output {
        Some(path) => {
            export_to_json(&snapshot, path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{} Exported {} requirements to {}",
                "✓".green(),
                snapshot.requirements.len(),
                path.display()
            );
        }
        None => println!("{}", serde_json::to_string_pretty(&snapshot)?),
    }
    Ok(())
}

// =============================================================================
// Types and statuses
// =============================================================================

fn handle_type_command(
    cmd: &TypeCommand,
    engine: &RequirementEngine,
    override_mode: bool,
) -> Result<()> {
    match cmd {
        TypeCommand::Add {
            code,
            name,
            color,
            icon,
        } => {
            let fields = TypeFields {
                type_code: Some(code.clone()),
                name: name.clone(),
                color: color.clone().map(Some),
                icon: icon.clone().map(Some),
                order_index: None,
            };
            let id = engine_result(engine.create_type(&fields, override_mode))?;
            println!("{} Type {} added (#{}).", "✓".green(), code, id);
        }
        TypeCommand::List => {
            let types = engine.list_types()?;
            println!("{}", "Requirement Types:".blue().bold());
            for t in types {
                let used = engine.store().count_requirements_with_type(t.id)?;
                println!(
                    "  {:<6} {} ({} in use)",
                    badge(&t.type_code, t.color.as_deref()),
                    t.name,
                    used
                );
            }
        }
        TypeCommand::Edit {
            code,
            new_code,
            name,
            color,
            icon,
            order,
        } => {
            let id = resolve_type(&engine.tree()?, code)?;
            let fields = TypeFields {
                type_code: new_code.clone(),
                name: name.clone(),
                color: color.as_deref().map(optional_text),
                icon: icon.as_deref().map(optional_text),
                order_index: *order,
            };
            engine_result(engine.update_type(id, &fields, override_mode))?;
            println!("{} Type {} updated.", "✓".green(), code);
        }
        TypeCommand::Del { code } => {
            let id = resolve_type(&engine.tree()?, code)?;
            engine_result(engine.delete_type(id, override_mode))?;
            println!("{} Type {} deleted.", "✓".green(), code);
        }
    }
    Ok(())
}

fn handle_status_command(cmd: &StatusCommand, engine: &RequirementEngine) -> Result<()> {
    match cmd {
        StatusCommand::Add { name, color } => {
            let fields = StatusFields {
                name: Some(name.clone()),
                color: color.clone().map(Some),
                order_index: None,
            };
            let id = engine.create_status(&fields)?;
            println!("{} Status {} added (#{}).", "✓".green(), name.trim(), id);
        }
        StatusCommand::List => {
            println!("{}", "Statuses:".blue().bold());
            for (index, status) in engine.list_statuses()?.into_iter().enumerate() {
                let used = engine.store().count_requirements_with_status(status.id)?;
                let default = if index == 0 { " (default)" } else { "" };
                println!(
                    "  {}{} ({} in use)",
                    badge(&status.name, status.color.as_deref()),
                    default.dimmed(),
                    used
                );
            }
        }
        StatusCommand::Edit {
            name,
            new_name,
            color,
            order,
        } => {
            let id = resolve_status(&engine.tree()?, name)?;
            let fields = StatusFields {
                name: new_name.clone(),
                color: color.as_deref().map(optional_text),
                order_index: *order,
            };
            engine.update_status(id, &fields)?;
            println!("{} Status {} updated.", "✓".green(), name);
        }
        StatusCommand::Del { name } => {
            let id = resolve_status(&engine.tree()?, name)?;
            engine.delete_status(id)?;
            println!("{} Status {} deleted.", "✓".green(), name);
        }
    }
    Ok(())
}

// =============================================================================
// Database files
// =============================================================================

fn handle_db_command(cmd: &DbCommand, engine: &RequirementEngine, db_path: &Path) -> Result<()> {
    match cmd {
        DbCommand::Info => {
            let stats = engine.store().stats()?;
            println!("{}: {}", "Path".blue(), db_path.display());
            println!("{}: {}", "Backend".blue(), stats.backend_type);
            for (key, value) in engine.store().list_meta()? {
                println!("{}: {}", key.blue(), value);
            }
            println!("{}: {}", "Requirements".blue(), stats.requirement_count);
            println!("{}: {}", "Types".blue(), stats.type_count);
            println!("{}: {}", "Statuses".blue(), stats.status_count);
        }
        DbCommand::ImportJson { file, yes } => {
            if !yes && !prompts::confirm("Replace all contents with this snapshot?")? {
                println!("{}", "Import cancelled.".yellow());
                return Ok(());
            }
            let snapshot = import_from_json(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let loaded = load_snapshot(engine.store(), &snapshot)?;
            println!("{} Loaded {} requirements.", "✓".green(), loaded);
        }
        DbCommand::Version { value } => match value {
            Some(value) => {
                engine.set_requirement_version(value.trim())?;
                println!("{} Requirement version set to {}.", "✓".green(), value.trim());
            }
            None => match engine.requirement_version()? {
                Some(version) => println!("{}", version),
                None => println!("{}", "No requirement version set.".yellow()),
            },
        },
        // Handled before the engine is opened
        DbCommand::Path | DbCommand::Import { .. } | DbCommand::SaveAs { .. } => {}
    }
    Ok(())
}

fn import_db_file(db_path: &Path, file: &Path, yes: bool) -> Result<()> {
    if !yes && !prompts::confirm("Replace the working database with this file?")? {
        println!("{}", "Import cancelled.".yellow());
        return Ok(());
    }
    let backend = SqliteBackend::new(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let name = file.file_name().and_then(|n| n.to_str());
    import_database(&backend, file, name)
        .with_context(|| format!("Could not import {}", file.display()))?;
    println!("{} Imported {}.", "✓".green(), file.display());
    Ok(())
}

fn save_db_copy(db_path: &Path, target: &Path) -> Result<()> {
    let backend = SqliteBackend::new(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let written: PathBuf = save_database_copy(&backend, target)?;
    println!("{} Saved copy to {}.", "✓".green(), written.display());
    Ok(())
}

// =============================================================================
// Settings
// =============================================================================

fn handle_config_command(
    cmd: &ConfigCommand,
    settings: &mut Settings,
    settings_path: &Path,
) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            println!("{}", "Settings:".blue().bold());
            println!("  File: {}", settings_path.display());
            println!("  Theme: {}", settings.theme);
            match &settings.default_db {
                Some(path) => println!("  Default database: {}", path.display()),
                None => println!("  Default database: {}", "(platform default)".dimmed()),
            }
            if let Some(version) = &settings.last_snapshot_version {
                println!("  Last snapshot version: {}", version);
            }
        }
        ConfigCommand::Set { theme, default_db } => {
            if theme.is_none() && default_db.is_none() {
                println!("{}", "No changes given.".yellow());
                return Ok(());
            }
            if let Some(theme) = theme {
                settings.theme = *theme;
            }
            if let Some(path) = default_db {
                settings.default_db = Some(path.clone());
            }
            settings
                .save(settings_path)
                .with_context(|| format!("Failed to write {}", settings_path.display()))?;
            println!("{} Settings saved.", "✓".green());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> TreeStore {
        let engine = RequirementEngine::in_memory();
        let root = engine
            .create_requirement(NewRequirement::new(1, "Root"), false)
            .unwrap();
        engine
            .create_requirement(NewRequirement::new(2, "Child").under(root), false)
            .unwrap();
        engine.tree().unwrap()
    }

    #[test]
    fn test_resolve_requirement_by_code_or_id() {
        let tree = tree();
        let child = resolve_requirement(&tree, "F0.0").unwrap();
        assert_eq!(resolve_requirement(&tree, &format!("#{}", child)).unwrap(), child);
        assert!(resolve_requirement(&tree, "F9").is_err());
        assert!(resolve_requirement(&tree, "#abc").is_err());
        assert!(resolve_requirement(&tree, "#999").is_err());
    }

    #[test]
    fn test_resolve_roots() {
        let tree = tree();
        assert_eq!(resolve_roots(&tree, &[]).unwrap(), RootSet::All);
        let root = resolve_requirement(&tree, "CORE0").unwrap();
        assert_eq!(
            resolve_roots(&tree, &["CORE0".to_string()]).unwrap(),
            RootSet::Subtrees(vec![root])
        );
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#1f9d55"), Some((0x1f, 0x9d, 0x55)));
        assert_eq!(parse_hex_color("1f9d55"), None);
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#+12345"), None);
    }

    #[test]
    fn test_optional_text_clears_on_blank() {
        assert_eq!(optional_text("  "), None);
        assert_eq!(optional_text("x"), Some("x".to_string()));
    }

    #[test]
    fn test_mutating_commands_take_the_lock() {
        assert!(is_mutating(&Command::Up { id: "F0".into() }));
        assert!(!is_mutating(&Command::Show { id: "F0".into() }));
        assert!(is_mutating(&Command::Db(DbCommand::Version {
            value: Some("2.0".into())
        })));
        assert!(!is_mutating(&Command::Db(DbCommand::Version { value: None })));
    }

    #[test]
    fn test_suggest_defaults_to_six() {
        let cli = Cli::try_parse_from(["reqtree", "suggest", "see F0"]).unwrap();
        match cli.command {
            Command::Suggest { text, limit } => {
                assert_eq!(text, "see F0");
                assert_eq!(limit, 6);
            }
            _ => panic!("expected suggest"),
        }
        assert!(!is_mutating(&Command::Suggest { text: String::new(), limit: 1 }));
    }
}
