use anyhow::Result;
use inquire::{Confirm, Select, Text};

use reqtree_core::{NewRequirement, RequirementId, TreeStore};

const NO_PARENT: &str = "(none - new root)";

/// Prompts the user for a new requirement
pub fn prompt_new_requirement(tree: &TreeStore) -> Result<NewRequirement> {
    let title = Text::new("Title:").prompt()?;

    let type_options: Vec<String> = tree
        .types()
        .iter()
        .map(|t| format!("{} - {}", t.type_code, t.name))
        .collect();
    let type_choice = Select::new("Type:", type_options).prompt()?;
    let type_code = type_choice.split(" - ").next().unwrap_or_default();
    let type_id = tree
        .type_by_code(type_code)
        .map(|t| t.id)
        .ok_or_else(|| anyhow::anyhow!("Unknown type {}", type_code))?;

    // Parents are offered in tree order
    let candidates: Vec<(RequirementId, String)> = tree
        .iter_preorder()
        .into_iter()
        .map(|req| {
            let label = tree.label_of(req.id).unwrap_or_default();
            (req.id, format!("{} {}", label, req.title))
        })
        .collect();
    let mut parent_options = vec![NO_PARENT.to_string()];
    parent_options.extend(candidates.iter().map(|(_, option)| option.clone()));
    let parent_choice = Select::new("Parent:", parent_options).prompt()?;
    let parent_id = candidates
        .iter()
        .find(|(_, option)| *option == parent_choice)
        .map(|(id, _)| *id);

    // Use the Editor type for multiline input
    let description = inquire::Editor::new("Description:").prompt()?;

    let rationale = Text::new("Rationale (optional):").prompt()?;

    let status_options: Vec<String> = tree.statuses().iter().map(|s| s.name.clone()).collect();
    let status_name = Select::new("Status:", status_options).prompt()?;

    let mut new = NewRequirement::new(type_id, title).with_description(description);
    if let Some(parent_id) = parent_id {
        new = new.under(parent_id);
    }
    if !rationale.trim().is_empty() {
        new.rationale_md = Some(rationale);
    }
    new.status_id = tree.status_by_name(&status_name).map(|s| s.id);
    Ok(new)
}

/// Opens the current description in an editor and returns the result
pub fn prompt_description(current: &str) -> Result<String> {
    let text = inquire::Editor::new("Description:")
        .with_predefined_text(current)
        .prompt()?;
    Ok(text)
}

/// Asks a yes/no question, defaulting to no
pub fn confirm(message: &str) -> Result<bool> {
    Ok(Confirm::new(message).with_default(false).prompt()?)
}

/// Asks for the snapshot version label, offering the last one used
pub fn prompt_version(last: Option<&str>) -> Result<String> {
    let mut prompt = Text::new("Snapshot version:");
    if let Some(last) = last {
        prompt = prompt.with_default(last);
    }
    let version = prompt.prompt()?;
    Ok(version.trim().to_string())
}
