/// Card markdown generation: the inverse of [`crate::parser`].
///
/// The engine regenerates the whole file on every confirmed cycle, so the
/// output is canonical: frontmatter first, then title, description,
/// checklists, pass-through sections, comments. Conflict annotations are
/// emitted as `> [!warning]` callout lines next to the affected entity.
use std::collections::BTreeMap;

use crate::parser::{CardFile, CardFrontmatter, CommentRef, OpaqueSection};
use crate::types::{Card, EntityKey};

/// A conflict note attached to one entity, rendered into the file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictAnnotation {
    pub key: EntityKey,
    pub message: String,
}

/// Render a card back to markdown.
///
/// `annotations` are the conflicts detected this cycle; each is written as a
/// callout directly under the entity it concerns.
pub fn render_card(file: &CardFile, annotations: &[ConflictAnnotation]) -> String {
    let card = &file.card;
    let mut out = String::new();

    out.push_str(&render_frontmatter(card));

    out.push_str(&format!("# {}\n\n", card.title));

    if !card.description.is_empty() {
        out.push_str("## Description\n\n");
        out.push_str(card.description.trim_end());
        out.push_str("\n\n");
    }

    for list in &card.checklists {
        out.push_str(&format!("## Checklist: {}\n\n", list.name));
        for item in &list.items {
            let mark = if item.state.is_complete() { 'x' } else { ' ' };
            out.push_str(&format!("- [{}] {}\n", mark, item.text));
            for ann in annotations {
                if let EntityKey::Item {
                    checklist,
                    item: item_text,
                } = &ann.key
                {
                    if checklist == &list.name && item_text == &item.text {
                        out.push_str(&format!("> [!warning] {}\n", ann.message));
                    }
                }
            }
        }
        out.push('\n');
    }

    for section in &file.opaque_sections {
        out.push_str(&format!("## {}\n", section.title));
        out.push_str(section.body.trim_end());
        out.push_str("\n\n");
    }

    if !card.comments.is_empty() {
        out.push_str("## Comments\n\n");
        for ann in annotations {
            if let EntityKey::Comment { .. } = &ann.key {
                out.push_str(&format!("> [!warning] {}\n", ann.message));
            }
        }
        for comment in &card.comments {
            out.push_str(&format!("#### Comment by {}\n", comment.author));
            if let Some(date) = comment.created_at {
                out.push_str(&format!("**Date:** {}\n", date.to_rfc3339()));
            }
            out.push('\n');
            out.push_str(comment.body.trim_end());
            out.push_str("\n\n---\n\n");
        }
    }

    out
}

fn render_frontmatter(card: &Card) -> String {
    let mut checkitem_ids: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut checklist_ids: BTreeMap<String, String> = BTreeMap::new();
    for list in &card.checklists {
        if let Some(id) = &list.remote_id {
            checklist_ids.insert(list.name.clone(), id.clone());
        }
        for item in &list.items {
            if let Some(id) = &item.remote_id {
                checkitem_ids
                    .entry(list.name.clone())
                    .or_default()
                    .insert(item.text.clone(), id.clone());
            }
        }
    }
    let comment_ids: Vec<CommentRef> = card
        .comments
        .iter()
        .filter_map(|c| {
            c.remote_id
                .as_ref()
                .map(|id| crate::parser::comment_ref(id, c))
        })
        .collect();

    let fm = CardFrontmatter {
        card_id: card.remote_id.clone(),
        board: card.board.clone(),
        board_id: card.board_id.clone(),
        list: card.list.clone(),
        list_id: card.list_id.clone(),
        url: card.url.clone(),
        checklist_ids,
        checkitem_ids,
        comment_ids,
        last_synced: card.last_synced,
        sync_status: card.sync_status,
        extra: card.extra.clone(),
    };

    // serde_yaml emits its own leading document marker when asked; build the
    // fenced block by hand to keep the exact `---` framing the parser expects.
    let yaml = serde_yaml::to_string(&fm).unwrap_or_default();
    format!("---\n{}---\n", yaml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_card;
    use crate::types::{CheckItem, Checklist, Comment, ItemState, SyncStatus};
    use std::path::PathBuf;

    fn sample_card() -> CardFile {
        CardFile {
            card: Card {
                remote_id: "abc123".into(),
                title: "Ship the release".into(),
                description: "Cut the branch.".into(),
                board: Some("Ops".into()),
                board_id: None,
                list: Some("Doing".into()),
                list_id: None,
                url: None,
                local_path: PathBuf::from("cards/ship.md"),
                checklists: vec![Checklist {
                    name: "Steps".into(),
                    remote_id: Some("cl1".into()),
                    items: vec![
                        CheckItem {
                            text: "Write tests".into(),
                            remote_id: Some("ci1".into()),
                            state: ItemState::Complete,
                        },
                        CheckItem {
                            text: "Tag release".into(),
                            remote_id: None,
                            state: ItemState::Incomplete,
                        },
                    ],
                }],
                comments: vec![Comment {
                    author: "Alice".into(),
                    created_at: None,
                    body: "Looks good to me.".into(),
                    remote_id: Some("cm1".into()),
                }],
                last_synced: None,
                sync_status: SyncStatus::Synced,
                extra: Default::default(),
            },
            opaque_sections: Vec::new(),
        }
    }

    #[test]
    fn test_round_trip() {
        let original = sample_card();
        let rendered = render_card(&original, &[]);
        let reparsed = parse_card(&rendered, &PathBuf::from("cards/ship.md")).unwrap();
        assert_eq!(reparsed.card.remote_id, original.card.remote_id);
        assert_eq!(reparsed.card.title, original.card.title);
        assert_eq!(reparsed.card.checklists, original.card.checklists);
        assert_eq!(reparsed.card.comments[0].body, original.card.comments[0].body);
        assert_eq!(
            reparsed.card.comments[0].remote_id,
            original.card.comments[0].remote_id
        );
    }

    #[test]
    fn test_round_trip_keeps_rule_in_comment_body() {
        let mut file = sample_card();
        file.card.comments[0].body = "part one\n\n---\n\npart two".into();
        let original_fp = file.card.comments[0].fingerprint();
        let rendered = render_card(&file, &[]);
        let reparsed = parse_card(&rendered, &PathBuf::from("cards/ship.md")).unwrap();
        assert_eq!(reparsed.card.comments.len(), 1);
        assert_eq!(reparsed.card.comments[0].body, file.card.comments[0].body);
        assert_eq!(reparsed.card.comments[0].fingerprint(), original_fp);
    }

    #[test]
    fn test_annotation_rendered_under_item() {
        let file = sample_card();
        let ann = ConflictAnnotation {
            key: EntityKey::Item {
                checklist: "Steps".into(),
                item: "Write tests".into(),
            },
            message: "Sync conflict: kept remote value 'complete'".into(),
        };
        let rendered = render_card(&file, &[ann]);
        let item_line = rendered.find("- [x] Write tests").unwrap();
        let warn_line = rendered.find("> [!warning]").unwrap();
        assert!(warn_line > item_line);
        // Annotations disappear on reparse.
        let reparsed = parse_card(&rendered, &PathBuf::from("c.md")).unwrap();
        assert_eq!(reparsed.card.checklists[0].items.len(), 2);
    }

    #[test]
    fn test_frontmatter_records_only_known_ids() {
        let rendered = render_card(&sample_card(), &[]);
        assert!(rendered.contains("Write tests: ci1"));
        assert!(!rendered.contains("Tag release: "));
    }
}
