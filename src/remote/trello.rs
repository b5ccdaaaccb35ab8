/// Trello REST client: the production [`RemoteBoardClient`].
///
/// Auth is key/token query parameters on every request, taken from the
/// `TRELLO_API_KEY` and `TRELLO_TOKEN` (or `TRELLO_API_TOKEN`) environment
/// variables. All calls are plain blocking-free reqwest round trips; retry
/// and rate limiting live in the engine, not here.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{RemoteBoardClient, RemoteError};
use crate::types::{
    BoardSummary, CardSummary, ItemState, ListSummary, RemoteCheckItem, RemoteChecklist,
    RemoteComment, RemoteSnapshot,
};

pub const TRELLO_BASE_URL: &str = "https://api.trello.com/1";

pub struct TrelloClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    token: String,
}

impl TrelloClient {
    pub fn new(api_key: impl Into<String>, token: impl Into<String>) -> Self {
        TrelloClient {
            http: reqwest::Client::new(),
            base_url: TRELLO_BASE_URL.to_string(),
            api_key: api_key.into(),
            token: token.into(),
        }
    }

    /// Credentials from the environment, as the original tool reads them.
    pub fn from_env() -> Result<Self, RemoteError> {
        let api_key = std::env::var("TRELLO_API_KEY").ok();
        let token = std::env::var("TRELLO_TOKEN")
            .or_else(|_| std::env::var("TRELLO_API_TOKEN"))
            .ok();
        match (api_key, token) {
            (Some(k), Some(t)) if !k.is_empty() && !t.is_empty() => Ok(TrelloClient::new(k, t)),
            _ => Err(RemoteError::Protocol(
                "TRELLO_API_KEY and TRELLO_TOKEN (or TRELLO_API_TOKEN) must be set".into(),
            )),
        }
    }

    /// Point the client at a different base URL (tests, mirrors).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut query: Vec<(&str, &str)> =
            vec![("key", self.api_key.as_str()), ("token", self.token.as_str())];
        query.extend_from_slice(params);

        let response = self
            .http
            .request(method, &url)
            .query(&query)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(endpoint.to_string()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RemoteError::RateLimited);
        }
        if !status.is_success() {
            return Err(RemoteError::Http(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Protocol(format!("{endpoint}: {e}")))
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct WireCard {
    id: String,
    name: String,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    closed: bool,
    #[serde(default, rename = "shortUrl")]
    short_url: Option<String>,
    #[serde(default, rename = "dateLastActivity")]
    date_last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    checklists: Vec<WireChecklist>,
}

#[derive(Debug, Deserialize)]
struct WireChecklist {
    id: String,
    name: String,
    #[serde(default)]
    pos: f64,
    #[serde(default, rename = "checkItems")]
    check_items: Vec<WireCheckItem>,
}

#[derive(Debug, Deserialize)]
struct WireCheckItem {
    id: String,
    name: String,
    state: ItemState,
    #[serde(default)]
    pos: f64,
}

#[derive(Debug, Deserialize)]
struct WireAction {
    id: String,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
    #[serde(default, rename = "memberCreator")]
    member_creator: Option<WireMember>,
    #[serde(default)]
    data: WireActionData,
}

#[derive(Debug, Default, Deserialize)]
struct WireActionData {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct WireMember {
    #[serde(default, rename = "fullName")]
    full_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireBoard {
    id: String,
    name: String,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "idOrganization")]
    id_organization: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireOrganization {
    #[serde(default, rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireList {
    id: String,
    name: String,
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct WireListCard {
    id: String,
    name: String,
    #[serde(default, rename = "dateLastActivity")]
    date_last_activity: Option<DateTime<Utc>>,
}

fn comment_from_action(action: WireAction) -> RemoteComment {
    let author = action
        .member_creator
        .and_then(|m| m.full_name.or(m.username))
        .unwrap_or_else(|| "Unknown".to_string());
    RemoteComment {
        id: action.id,
        author,
        created_at: action.date,
        body: action.data.text,
    }
}

#[async_trait]
impl RemoteBoardClient for TrelloClient {
    async fn fetch_card_snapshot(&self, card_id: &str) -> Result<RemoteSnapshot, RemoteError> {
        let card: WireCard = self
            .request(
                reqwest::Method::GET,
                &format!("cards/{card_id}"),
                &[
                    ("fields", "name,desc,closed,shortUrl,dateLastActivity"),
                    ("checklists", "all"),
                    ("checklist_fields", "all"),
                ],
            )
            .await?;
        let actions: Vec<WireAction> = self
            .request(
                reqwest::Method::GET,
                &format!("cards/{card_id}/actions"),
                &[("filter", "commentCard")],
            )
            .await?;

        let mut checklists: Vec<WireChecklist> = card.checklists;
        checklists.sort_by(|a, b| a.pos.total_cmp(&b.pos));
        let checklists = checklists
            .into_iter()
            .map(|mut cl| {
                cl.check_items.sort_by(|a, b| a.pos.total_cmp(&b.pos));
                RemoteChecklist {
                    id: cl.id,
                    name: cl.name,
                    items: cl
                        .check_items
                        .into_iter()
                        .map(|i| RemoteCheckItem {
                            id: i.id,
                            name: i.name,
                            state: i.state,
                        })
                        .collect(),
                }
            })
            .collect();

        // Trello returns newest first; the local file reads oldest first.
        let mut comments: Vec<RemoteComment> =
            actions.into_iter().map(comment_from_action).collect();
        comments.reverse();

        Ok(RemoteSnapshot {
            card_id: card.id,
            name: card.name,
            description: card.desc,
            closed: card.closed,
            url: card.short_url,
            last_activity: card.date_last_activity,
            checklists,
            comments,
        })
    }

    async fn add_comment(&self, card_id: &str, text: &str) -> Result<String, RemoteError> {
        #[derive(Deserialize)]
        struct Created {
            id: String,
        }
        let created: Created = self
            .request(
                reqwest::Method::POST,
                &format!("cards/{card_id}/actions/comments"),
                &[("text", text)],
            )
            .await?;
        Ok(created.id)
    }

    async fn set_checkitem_state(
        &self,
        card_id: &str,
        checkitem_id: &str,
        state: ItemState,
    ) -> Result<(), RemoteError> {
        let _: serde_json::Value = self
            .request(
                reqwest::Method::PUT,
                &format!("cards/{card_id}/checkItem/{checkitem_id}"),
                &[("state", state.as_str())],
            )
            .await?;
        Ok(())
    }

    async fn list_boards(&self) -> Result<Vec<BoardSummary>, RemoteError> {
        let boards: Vec<WireBoard> = self
            .request(
                reqwest::Method::GET,
                "members/me/boards",
                &[("filter", "all")],
            )
            .await?;
        Ok(boards
            .into_iter()
            .map(|b| BoardSummary {
                id: b.id,
                name: b.name,
                closed: b.closed,
                url: b.url,
                organization: None,
            })
            .collect())
    }

    async fn board(&self, board_id: &str) -> Result<BoardSummary, RemoteError> {
        let board: WireBoard = self
            .request(reqwest::Method::GET, &format!("boards/{board_id}"), &[])
            .await?;
        // Organization lookup is best effort, as in the original tool.
        let organization = match &board.id_organization {
            Some(org_id) if !org_id.is_empty() => self
                .request::<WireOrganization>(
                    reqwest::Method::GET,
                    &format!("organizations/{org_id}"),
                    &[],
                )
                .await
                .ok()
                .and_then(|o| o.display_name),
            _ => None,
        };
        Ok(BoardSummary {
            id: board.id,
            name: board.name,
            closed: board.closed,
            url: board.url,
            organization,
        })
    }

    async fn board_lists(&self, board_id: &str) -> Result<Vec<ListSummary>, RemoteError> {
        let lists: Vec<WireList> = self
            .request(
                reqwest::Method::GET,
                &format!("boards/{board_id}/lists"),
                &[("filter", "all")],
            )
            .await?;
        Ok(lists
            .into_iter()
            .map(|l| ListSummary {
                id: l.id,
                name: l.name,
                closed: l.closed,
            })
            .collect())
    }

    async fn cards_in_list(&self, list_id: &str) -> Result<Vec<CardSummary>, RemoteError> {
        let cards: Vec<WireListCard> = self
            .request(
                reqwest::Method::GET,
                &format!("lists/{list_id}/cards"),
                &[("fields", "id,name,dateLastActivity")],
            )
            .await?;
        Ok(cards
            .into_iter()
            .map(|c| CardSummary {
                id: c.id,
                name: c.name,
                last_activity: c.date_last_activity,
            })
            .collect())
    }
}
