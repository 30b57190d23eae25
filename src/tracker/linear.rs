use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{ProgressSink, TicketProvider, truncate_body};
use crate::config::Credentials;
use crate::errors::TrackerError;
use crate::ticket::{Comment, Ticket, TicketId};

const ISSUE_QUERY: &str = r#"query Issue($id: String!) {
  issue(id: $id) {
    id
    identifier
    title
    description
    state { name }
    team { name }
    assignee { name displayName }
  }
}"#;

const COMMENTS_QUERY: &str = r#"query IssueComments($id: String!, $after: String) {
  issue(id: $id) {
    comments(first: 100, after: $after) {
      nodes { body createdAt user { name displayName } }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

/// Upper bound on comment pages fetched for one ticket.
const MAX_COMMENT_PAGES: usize = 20;

const COMMENT_CREATE_MUTATION: &str = r#"mutation CommentCreate($input: CommentCreateInput!) {
  commentCreate(input: $input) { success }
}"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct IssueData {
    issue: Option<IssueNode>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserNode {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
}

impl UserNode {
    fn label(self) -> String {
        self.display_name
            .filter(|d| !d.is_empty())
            .unwrap_or(self.name)
    }
}

#[derive(Debug, Deserialize)]
struct IssueNode {
    id: String,
    identifier: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    state: Named,
    team: Named,
    #[serde(default)]
    assignee: Option<UserNode>,
}

#[derive(Debug, Deserialize)]
struct CommentsData {
    issue: Option<CommentsIssue>,
}

#[derive(Debug, Deserialize)]
struct CommentsIssue {
    comments: Connection<CommentNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    nodes: Vec<T>,
    #[serde(default)]
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    #[serde(default)]
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentNode {
    body: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    user: Option<UserNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentCreateData {
    comment_create: CommentCreatePayload,
}

#[derive(Debug, Deserialize)]
struct CommentCreatePayload {
    success: bool,
}

/// Linear reports a missing entity as `Entity not found: <Type>`. Other
/// messages mentioning "not found" (schema errors) are not about the ticket.
fn is_not_found(errors: &[GraphQlError]) -> bool {
    errors
        .iter()
        .any(|e| e.message.trim_start().starts_with("Entity not found"))
}

/// Linear GraphQL client implementing both tracker contracts.
pub struct LinearClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    comment_max_chars: usize,
}

impl LinearClient {
    pub fn new(credentials: &Credentials, api_url: &str, comment_max_chars: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.to_string(),
            api_key: credentials.api_key().to_string(),
            comment_max_chars,
        }
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<GraphQlResponse<T>, TrackerError> {
        let resp = self
            .http
            .post(&self.api_url)
            .header("Authorization", &self.api_key)
            .header("User-Agent", "assemble")
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| TrackerError::Transient(format!("{:#}", e)))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TrackerError::Unauthorized);
        }

        let text = resp
            .text()
            .await
            .map_err(|e| TrackerError::Transient(format!("{:#}", e)))?;

        // Linear reports GraphQL errors with 400, so only give up on the body
        // when it is not a GraphQL envelope carrying errors.
        match serde_json::from_str::<GraphQlResponse<T>>(&text) {
            Ok(parsed) if status.is_success() || !parsed.errors.is_empty() => Ok(parsed),
            Ok(_) => Err(TrackerError::Transient(format!("HTTP {}", status))),
            Err(_) if !status.is_success() => {
                Err(TrackerError::Transient(format!("HTTP {}", status)))
            }
            Err(e) => Err(TrackerError::Transient(format!(
                "{:#}",
                anyhow::Error::new(e).context("Failed to parse Linear response")
            ))),
        }
    }

    async fn try_post_comment(
        &self,
        id: &TicketId,
        body: &str,
        internal_id: Option<&str>,
    ) -> anyhow::Result<bool> {
        let issue_id = internal_id.unwrap_or(id.as_str());
        let body = truncate_body(body, self.comment_max_chars);
        let resp: GraphQlResponse<CommentCreateData> = self
            .graphql(
                COMMENT_CREATE_MUTATION,
                json!({ "input": { "issueId": issue_id, "body": body } }),
            )
            .await
            .context("commentCreate request failed")?;

        if let Some(err) = resp.errors.first() {
            anyhow::bail!("commentCreate returned error: {}", err.message);
        }
        Ok(resp.data.is_some_and(|d| d.comment_create.success))
    }
}

#[async_trait]
impl TicketProvider for LinearClient {
    async fn fetch_ticket(&self, id: &TicketId) -> Result<Ticket, TrackerError> {
        let resp: GraphQlResponse<IssueData> = self
            .graphql(ISSUE_QUERY, json!({ "id": id.as_str() }))
            .await?;

        if is_not_found(&resp.errors) {
            return Err(TrackerError::NotFound(id.to_string()));
        }
        if let Some(err) = resp.errors.first() {
            return Err(TrackerError::Transient(err.message.clone()));
        }
        let node = resp
            .data
            .and_then(|d| d.issue)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;

        // The tracker echoes its canonical casing; keep the caller's id if it
        // is somehow unparseable.
        let identifier = TicketId::parse(&node.identifier).unwrap_or_else(|_| id.clone());

        Ok(Ticket {
            identifier,
            internal_id: node.id,
            title: node.title,
            description: node.description.unwrap_or_default(),
            state: node.state.name,
            team: node.team.name,
            assignee: node.assignee.map(UserNode::label),
        })
    }

    async fn fetch_comments(&self, id: &TicketId) -> Result<Vec<Comment>, TrackerError> {
        let mut comments = Vec::new();
        let mut after: Option<String> = None;

        for _ in 0..MAX_COMMENT_PAGES {
            let resp: GraphQlResponse<CommentsData> = self
                .graphql(COMMENTS_QUERY, json!({ "id": id.as_str(), "after": after }))
                .await?;

            if let Some(err) = resp.errors.first() {
                return Err(TrackerError::Transient(err.message.clone()));
            }
            let connection = resp
                .data
                .and_then(|d| d.issue)
                .ok_or_else(|| TrackerError::NotFound(id.to_string()))?
                .comments;

            comments.extend(connection.nodes.into_iter().map(|c| Comment {
                body: c.body,
                author: c
                    .user
                    .map(UserNode::label)
                    .unwrap_or_else(|| "Unknown".to_string()),
                created_at: c.created_at,
            }));

            match connection.page_info {
                Some(PageInfo {
                    has_next_page: true,
                    end_cursor: Some(cursor),
                }) => after = Some(cursor),
                _ => return Ok(comments),
            }
        }

        tracing::warn!(
            ticket = %id,
            fetched = comments.len(),
            "Ticket has more comments than fetched; older comments were skipped"
        );
        Ok(comments)
    }
}

#[async_trait]
impl ProgressSink for LinearClient {
    async fn post_comment(&self, id: &TicketId, body: &str, internal_id: Option<&str>) -> bool {
        match self.try_post_comment(id, body, internal_id).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(ticket = %id, "Linear did not accept the comment");
                false
            }
            Err(e) => {
                tracing::warn!(ticket = %id, "Failed to post comment: {:#}", e);
                false
            }
        }
    }
}
