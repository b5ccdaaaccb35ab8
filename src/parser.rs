/// Card markdown parser.
///
/// Handles the card file format:
///   --- YAML frontmatter (card id, id maps, sync metadata) ---
///   # Card title
///   ## Description
///   ## Checklist: Name
///   - [ ] item text
///   ## Comments
///   #### Comment by Author
///   **Date:** 2026-01-02T03:04:05Z
///
/// Conflict callout lines (`> [!warning] …`) are annotations written by the
/// engine and are skipped on parse; they are regenerated on every write.
///
/// Duplicate checklist names and duplicate (checklist, item) pairs make
/// name-keyed matching ambiguous and are a fatal validation error.
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::fingerprint;
use crate::types::{Card, CheckItem, Checklist, Comment, ItemState, SyncStatus};

static CHECKITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- \[([ xX])\] (.*)$").expect("static regex"));

/// Reference to a pushed comment, kept in frontmatter so the file itself
/// records which comments are already on the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRef {
    pub id: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub fingerprint: String,
}

/// The YAML frontmatter of a card file. Human-inspectable sync metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardFrontmatter {
    pub card_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checklist_ids: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checkitem_ids: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comment_ids: Vec<CommentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A body section the sync engine does not own (e.g. attachments).
/// Carried verbatim so a rewrite never loses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpaqueSection {
    pub title: String,
    pub body: String,
}

/// A parsed card file: the card plus sections we only pass through.
#[derive(Debug, Clone, PartialEq)]
pub struct CardFile {
    pub card: Card,
    pub opaque_sections: Vec<OpaqueSection>,
}

enum Section {
    None,
    Description,
    Checklist(usize),
    Comments,
    Opaque(usize),
}

/// Parse a card markdown file into a [`Card`].
pub fn parse_card(content: &str, path: &Path) -> Result<CardFile, SyncError> {
    let content = content.replace("\r\n", "\n").replace('\r', "\n");
    let card_name = path.display().to_string();

    let (frontmatter, body) = split_frontmatter(&content)
        .ok_or_else(|| SyncError::validation(&card_name, "missing YAML frontmatter"))?;
    let fm: CardFrontmatter = serde_yaml::from_str(frontmatter)
        .map_err(|e| SyncError::validation(&card_name, format!("invalid frontmatter: {e}")))?;
    if fm.card_id.is_empty() {
        return Err(SyncError::validation(
            &card_name,
            "frontmatter missing card_id",
        ));
    }

    let mut title = String::new();
    let mut description: Vec<&str> = Vec::new();
    let mut checklists: Vec<Checklist> = Vec::new();
    let mut comments: Vec<Comment> = Vec::new();
    let mut opaque: Vec<OpaqueSection> = Vec::new();
    let mut section = Section::None;

    // Comment block accumulator
    let mut cur_author: Option<String> = None;
    let mut cur_date: Option<DateTime<Utc>> = None;
    let mut cur_body: Vec<String> = Vec::new();

    let mut flush_comment =
        |author: &mut Option<String>, date: &mut Option<DateTime<Utc>>, body: &mut Vec<String>| {
            if let Some(a) = author.take() {
                let text = body.join("\n").trim().to_string();
                body.clear();
                comments.push(Comment {
                    author: a,
                    created_at: date.take(),
                    body: text,
                    remote_id: None,
                });
            }
        };

    let lines: Vec<&str> = body.split('\n').collect();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_end();

        // Engine-written conflict annotations are never round-tripped.
        if trimmed.trim_start().starts_with("> [!warning]") {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("## ") {
            flush_comment(&mut cur_author, &mut cur_date, &mut cur_body);
            if rest == "Description" {
                section = Section::Description;
            } else if let Some(name) = rest.strip_prefix("Checklist: ") {
                checklists.push(Checklist {
                    name: name.trim().to_string(),
                    remote_id: fm.checklist_ids.get(name.trim()).cloned(),
                    items: Vec::new(),
                });
                section = Section::Checklist(checklists.len() - 1);
            } else if rest == "Comments" {
                section = Section::Comments;
            } else {
                opaque.push(OpaqueSection {
                    title: rest.to_string(),
                    body: String::new(),
                });
                section = Section::Opaque(opaque.len() - 1);
            }
            continue;
        }

        if let Some(t) = trimmed.strip_prefix("# ") {
            if title.is_empty() {
                title = t.trim().to_string();
                continue;
            }
        }

        match section {
            Section::None => {}
            Section::Description => description.push(trimmed),
            Section::Checklist(idx) => {
                if let Some(caps) = CHECKITEM_RE.captures(trimmed) {
                    let checked = &caps[1] != " ";
                    let text = caps[2].trim().to_string();
                    let list = &mut checklists[idx];
                    let remote_id = fm
                        .checkitem_ids
                        .get(&list.name)
                        .and_then(|m| m.get(&text))
                        .cloned();
                    list.items.push(CheckItem {
                        text,
                        remote_id,
                        state: ItemState::from_checked(checked),
                    });
                }
            }
            Section::Comments => {
                if let Some(author) = trimmed.strip_prefix("#### Comment by ") {
                    flush_comment(&mut cur_author, &mut cur_date, &mut cur_body);
                    cur_author = Some(author.trim().to_string());
                } else if let Some(date) = trimmed.strip_prefix("**Date:** ") {
                    cur_date = DateTime::parse_from_rfc3339(date.trim())
                        .ok()
                        .map(|d| d.with_timezone(&Utc));
                } else if trimmed == "---" && closes_comment(&lines[i + 1..]) {
                    flush_comment(&mut cur_author, &mut cur_date, &mut cur_body);
                } else if cur_author.is_some() {
                    cur_body.push(trimmed.to_string());
                }
            }
            Section::Opaque(idx) => {
                opaque[idx].body.push_str(trimmed);
                opaque[idx].body.push('\n');
            }
        }
    }
    flush_comment(&mut cur_author, &mut cur_date, &mut cur_body);

    validate_unique_keys(&card_name, &checklists)?;

    // Attach remote ids to comments whose fingerprint the frontmatter knows.
    for comment in &mut comments {
        let fp = comment.fingerprint();
        if let Some(r) = fm.comment_ids.iter().find(|r| r.fingerprint == fp) {
            comment.remote_id = Some(r.id.clone());
            if comment.created_at.is_none() {
                comment.created_at = r.date;
            }
        }
    }

    let card = Card {
        remote_id: fm.card_id,
        title,
        description: description.join("\n").trim().to_string(),
        board: fm.board,
        board_id: fm.board_id,
        list: fm.list,
        list_id: fm.list_id,
        url: fm.url,
        local_path: path.to_path_buf(),
        checklists,
        comments,
        last_synced: fm.last_synced,
        sync_status: fm.sync_status,
        extra: fm.extra,
    };

    Ok(CardFile {
        card,
        opaque_sections: opaque,
    })
}

/// A bare `---` line ends a comment only when the next populated line
/// starts another comment or leaves the section; otherwise it is a
/// horizontal rule inside the comment body and must round-trip intact.
fn closes_comment(rest: &[&str]) -> bool {
    for line in rest {
        let t = line.trim_end();
        if t.is_empty() {
            continue;
        }
        return t.starts_with("#### Comment by ") || t.starts_with("## ");
    }
    true
}

/// Split content into (frontmatter YAML, remaining body).
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---\n")?;
    let end = rest.find("\n---\n")?;
    Some((&rest[..end], &rest[end + 5..]))
}

/// Duplicate name keys make matching ambiguous. Fatal, never guessed.
fn validate_unique_keys(card: &str, checklists: &[Checklist]) -> Result<(), SyncError> {
    let mut list_names: HashSet<&str> = HashSet::new();
    for list in checklists {
        if !list_names.insert(&list.name) {
            return Err(SyncError::validation(
                card,
                format!("duplicate checklist name '{}'", list.name),
            ));
        }
        let mut item_texts: HashSet<&str> = HashSet::new();
        for item in &list.items {
            if !item_texts.insert(&item.text) {
                return Err(SyncError::validation(
                    card,
                    format!(
                        "duplicate checklist item '{}' in checklist '{}'",
                        item.text, list.name
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Build a frontmatter ref for a comment confirmed on the remote side.
pub fn comment_ref(id: &str, comment: &Comment) -> CommentRef {
    CommentRef {
        id: id.to_string(),
        author: comment.author.clone(),
        date: comment.created_at,
        fingerprint: fingerprint::comment_fingerprint(&comment.author, &comment.body),
    }
}
