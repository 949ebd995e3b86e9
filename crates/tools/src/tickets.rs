//! Help-desk ticket tools backed by an in-memory ticket book.
//!
//! Every mutation takes the book's single lock; concurrent updates to the
//! same ticket are last-writer-wins.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use deskloop_core::error::ToolError;
use deskloop_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

const AGENT_AUTHOR: &str = "IT Support Agent";
const SYSTEM_AUTHOR: &str = "IT Support System";

/// Categories a ticket may be filed under.
pub const CATEGORIES: [&str; 9] = [
    "hardware",
    "software",
    "network",
    "account_access",
    "email",
    "printer",
    "vpn",
    "security",
    "other",
];

/// A help-desk agent tickets can be assigned to.
#[derive(Debug, Clone, Copy)]
pub struct SupportAgent {
    pub id: &'static str,
    pub name: &'static str,
    pub email: &'static str,
}

pub const SUPPORT_AGENTS: [SupportAgent; 4] = [
    SupportAgent {
        id: "agent_1",
        name: "Tech Support",
        email: "techsupport@company.com",
    },
    SupportAgent {
        id: "agent_2",
        name: "Admin",
        email: "admin@company.com",
    },
    SupportAgent {
        id: "agent_3",
        name: "Network",
        email: "network@company.com",
    },
    SupportAgent {
        id: "agent_4",
        name: "Security",
        email: "security@company.com",
    },
];

/// Ordered least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// (first response, resolution) targets.
    pub fn sla_targets(self) -> (Duration, Duration) {
        match self {
            Self::Urgent => (Duration::minutes(15), Duration::hours(4)),
            Self::High => (Duration::hours(1), Duration::hours(8)),
            Self::Normal => (Duration::hours(4), Duration::hours(24)),
            Self::Low => (Duration::hours(8), Duration::hours(48)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(ToolError::InvalidArguments(format!(
                "Invalid priority '{other}'. Valid options: low, normal, high, urgent"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    New,
    Open,
    Pending,
    Solved,
    Closed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Solved => "solved",
            Self::Closed => "closed",
        }
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Solved | Self::Closed)
    }
}

impl FromStr for Status {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" => Ok(Self::New),
            "open" => Ok(Self::Open),
            "pending" => Ok(Self::Pending),
            "solved" => Ok(Self::Solved),
            "closed" => Ok(Self::Closed),
            other => Err(ToolError::InvalidArguments(format!(
                "Invalid status '{other}'. Valid options: new, open, pending, solved, closed"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub public: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: u64,
    pub subject: String,
    pub description: String,
    pub priority: Priority,
    pub status: Status,
    pub category: String,
    pub requester_name: String,
    pub requester_email: String,
    pub assignee_id: Option<String>,
    pub assignee_name: Option<String>,
    pub tags: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub first_response_due: DateTime<Utc>,
    pub resolution_due: DateTime<Utc>,
}

impl Ticket {
    /// Whether the (first response, resolution) targets are breached as of `now`.
    pub fn sla_breach(&self, now: DateTime<Utc>) -> (bool, bool) {
        let responded = self.first_response_at.unwrap_or(now);
        let resolved = self.resolved_at.unwrap_or(now);
        (responded > self.first_response_due, resolved > self.resolution_due)
    }

    fn add_comment(&mut self, body: &str, public: bool, now: DateTime<Utc>) {
        if self.first_response_at.is_none() && self.comments.is_empty() {
            self.first_response_at = Some(now);
        }
        self.comments.push(Comment {
            author: AGENT_AUTHOR.into(),
            body: body.to_string(),
            public,
            created_at: now,
        });
        self.updated_at = now;
    }

    /// Internal audit note. Does not count as a first response.
    fn add_system_note(&mut self, body: String, now: DateTime<Utc>) {
        self.comments.push(Comment {
            author: SYSTEM_AUTHOR.into(),
            body,
            public: false,
            created_at: now,
        });
        self.updated_at = now;
    }

    fn is_open(&self) -> bool {
        matches!(self.status, Status::New | Status::Open | Status::Pending)
    }
}

#[derive(Debug, Default)]
struct BookState {
    next_id: u64,
    tickets: BTreeMap<u64, Ticket>,
}

/// The process-wide ticket store shared by all ticket tools.
#[derive(Debug, Default)]
pub struct TicketBook {
    state: Mutex<BookState>,
}

/// Fields for a new ticket.
#[derive(Debug, Clone, Default)]
pub struct NewTicket {
    pub subject: String,
    pub description: String,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub requester_name: Option<String>,
    pub requester_email: Option<String>,
}

impl TicketBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, new: NewTicket) -> Ticket {
        let now = Utc::now();
        let priority = new.priority.unwrap_or(Priority::Normal);
        let (first_response, resolution) = priority.sla_targets();

        let mut state = self.state.lock().await;
        state.next_id += 1;
        let ticket = Ticket {
            id: state.next_id,
            subject: new.subject,
            description: new.description,
            priority,
            status: Status::New,
            category: new.category.unwrap_or_else(|| "other".into()),
            requester_name: new.requester_name.unwrap_or_else(|| "Unknown User".into()),
            requester_email: new.requester_email.unwrap_or_else(|| "unknown@company.com".into()),
            assignee_id: None,
            assignee_name: None,
            tags: Vec::new(),
            due_date: None,
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
            first_response_at: None,
            resolved_at: None,
            first_response_due: now + first_response,
            resolution_due: now + resolution,
        };
        state.tickets.insert(ticket.id, ticket.clone());
        tracing::info!(ticket = ticket.id, priority = priority.as_str(), "Ticket created");
        ticket
    }

    pub async fn get(&self, id: u64) -> Option<Ticket> {
        self.state.lock().await.tickets.get(&id).cloned()
    }

    /// Set the status, optionally with a public comment. Returns the previous
    /// status and the updated ticket.
    pub async fn update_status(
        &self,
        id: u64,
        status: Status,
        comment: Option<&str>,
    ) -> Result<(Status, Ticket), ToolError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let ticket = state.tickets.get_mut(&id).ok_or_else(|| not_found(id))?;

        let previous = ticket.status;
        ticket.status = status;
        ticket.updated_at = now;
        if status.is_resolved() && ticket.resolved_at.is_none() {
            ticket.resolved_at = Some(now);
        }
        if let Some(body) = comment.filter(|c| !c.trim().is_empty()) {
            ticket.add_comment(body, true, now);
        }
        Ok((previous, ticket.clone()))
    }

    pub async fn add_comment(&self, id: u64, body: &str, public: bool) -> Result<Ticket, ToolError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let ticket = state.tickets.get_mut(&id).ok_or_else(|| not_found(id))?;
        ticket.add_comment(body, public, now);
        Ok(ticket.clone())
    }

    /// Apply `change` to one ticket under the lock; returns its result and
    /// the updated ticket.
    async fn modify<R>(
        &self,
        id: u64,
        change: impl FnOnce(&mut Ticket, DateTime<Utc>) -> R,
    ) -> Result<(R, Ticket), ToolError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let ticket = state.tickets.get_mut(&id).ok_or_else(|| not_found(id))?;
        let out = change(ticket, now);
        Ok((out, ticket.clone()))
    }

    /// Change the priority and recompute both SLA due times from the
    /// creation time. Returns the previous priority.
    pub async fn update_priority(&self, id: u64, priority: Priority) -> Result<(Priority, Ticket), ToolError> {
        self.modify(id, |t, now| {
            let previous = t.priority;
            let (first_response, resolution) = priority.sla_targets();
            t.priority = priority;
            t.first_response_due = t.created_at + first_response;
            t.resolution_due = t.created_at + resolution;
            t.add_system_note(
                format!(
                    "Priority changed from {} to {}",
                    previous.as_str().to_uppercase(),
                    priority.as_str().to_uppercase()
                ),
                now,
            );
            previous
        })
        .await
    }

    /// Returns the previous assignee's name.
    pub async fn assign(&self, id: u64, agent: &SupportAgent) -> Result<(Option<String>, Ticket), ToolError> {
        self.modify(id, |t, now| {
            t.assignee_id = Some(agent.id.to_string());
            t.updated_at = now;
            t.assignee_name.replace(agent.name.to_string())
        })
        .await
    }

    /// Add lowercased tags not already present. Returns the ones added.
    pub async fn add_tags(&self, id: u64, tags: &[String]) -> Result<(Vec<String>, Ticket), ToolError> {
        self.modify(id, |t, now| {
            let mut added = Vec::new();
            for tag in tags.iter().map(|tag| tag.trim().to_lowercase()) {
                if !tag.is_empty() && !t.tags.contains(&tag) {
                    t.tags.push(tag.clone());
                    added.push(tag);
                }
            }
            if !added.is_empty() {
                t.updated_at = now;
            }
            added
        })
        .await
    }

    /// Returns the previous category.
    pub async fn set_category(&self, id: u64, category: &str) -> Result<(String, Ticket), ToolError> {
        self.modify(id, |t, now| {
            t.updated_at = now;
            std::mem::replace(&mut t.category, category.to_string())
        })
        .await
    }

    /// Returns the previous due date.
    pub async fn set_due_date(
        &self,
        id: u64,
        due: DateTime<Utc>,
    ) -> Result<(Option<DateTime<Utc>>, Ticket), ToolError> {
        self.modify(id, |t, now| {
            t.updated_at = now;
            t.due_date.replace(due)
        })
        .await
    }

    pub async fn delete(&self, id: u64) -> Result<Ticket, ToolError> {
        let removed = self.state.lock().await.tickets.remove(&id).ok_or_else(|| not_found(id))?;
        tracing::info!(ticket = id, "Ticket deleted");
        Ok(removed)
    }

    /// New, open and pending tickets: most urgent first, then oldest first.
    pub async fn open_tickets(&self, limit: usize) -> Vec<Ticket> {
        let mut open: Vec<Ticket> = self
            .state
            .lock()
            .await
            .tickets
            .values()
            .filter(|t| t.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        open.truncate(limit);
        open
    }

    /// Case-insensitive substring match on subject and description, oldest first.
    pub async fn search(&self, query: &str, status: Option<Status>, limit: usize) -> Vec<Ticket> {
        let query = query.to_lowercase();
        self.state
            .lock()
            .await
            .tickets
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .filter(|t| {
                t.subject.to_lowercase().contains(&query)
                    || t.description.to_lowercase().contains(&query)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.tickets.len()
    }
}

fn not_found(id: u64) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "tickets".into(),
        reason: format!("Ticket #{id} not found. Please verify the ticket ID and try again."),
    }
}

fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    args[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

fn optional_str(args: &serde_json::Value, key: &str) -> Option<String> {
    args[key].as_str().map(str::to_string).filter(|s| !s.trim().is_empty())
}

/// Accepts `7`, `"7"` and `"#7"`.
fn ticket_id(args: &serde_json::Value) -> Result<u64, ToolError> {
    let value = &args["ticket_id"];
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().trim_start_matches('#').parse().ok()))
        .ok_or_else(|| ToolError::InvalidArguments("Missing or invalid 'ticket_id' argument".into()))
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS` (UTC) or `YYYY-MM-DD` (midnight UTC).
fn parse_due_date(raw: &str) -> Result<DateTime<Utc>, ToolError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| {
            ToolError::InvalidArguments(format!(
                "Invalid due date '{raw}'. Use YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS"
            ))
        })
}

fn ticket_summary(t: &Ticket) -> String {
    format!(
        "**#{}** - {}\n  Status: {} | Priority: {}\n  Created: {}\n  Requester: {}\n",
        t.id,
        t.subject,
        t.status.as_str().to_uppercase(),
        t.priority.as_str().to_uppercase(),
        t.created_at.format("%Y-%m-%d %H:%M"),
        t.requester_name
    )
}

fn ticket_data(t: &Ticket) -> serde_json::Value {
    serde_json::to_value(t).unwrap_or_default()
}

macro_rules! ticket_tool {
    ($name:ident) => {
        pub struct $name {
            book: Arc<TicketBook>,
        }

        impl $name {
            pub fn new(book: Arc<TicketBook>) -> Self {
                Self { book }
            }
        }
    };
}

ticket_tool!(CreateTicketTool);
ticket_tool!(GetTicketTool);
ticket_tool!(UpdateTicketStatusTool);
ticket_tool!(AddTicketCommentTool);
ticket_tool!(SearchTicketsTool);
ticket_tool!(UpdateTicketPriorityTool);
ticket_tool!(GetMyOpenTicketsTool);
ticket_tool!(AssignTicketTool);
ticket_tool!(AddTagsToTicketTool);
ticket_tool!(SetTicketCategoryTool);
ticket_tool!(SetTicketDueDateTool);
ticket_tool!(DeleteTicketTool);

#[async_trait]
impl Tool for CreateTicketTool {
    fn name(&self) -> &str {
        "create_ticket"
    }

    fn description(&self) -> &str {
        "Create a new support ticket to report or escalate an IT issue that needs tracking."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "subject": { "type": "string", "description": "Brief summary of the issue" },
                "description": { "type": "string", "description": "Detailed description of the problem" },
                "priority": {
                    "type": "string",
                    "enum": ["low", "normal", "high", "urgent"],
                    "description": "Ticket priority (default normal)"
                },
                "category": { "type": "string", "description": "e.g. hardware, software, network, vpn" },
                "requester_name": { "type": "string" },
                "requester_email": { "type": "string" }
            },
            "required": ["subject", "description"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let subject = required_str(&arguments, "subject")?;
        let description = required_str(&arguments, "description")?;
        // Unknown priorities degrade to normal rather than failing the call.
        let priority = optional_str(&arguments, "priority").and_then(|p| p.parse().ok());

        let ticket = self
            .book
            .create(NewTicket {
                subject: subject.to_string(),
                description: description.to_string(),
                priority,
                category: optional_str(&arguments, "category"),
                requester_name: optional_str(&arguments, "requester_name"),
                requester_email: optional_str(&arguments, "requester_email"),
            })
            .await;

        let output = format!(
            "Ticket Created Successfully!\n\n**Ticket ID**: #{}\n**Subject**: {}\n**Priority**: {}\n**Status**: NEW\n**Requester**: {} ({})\n**First response due**: {}\n**Resolution due**: {}\n\nReference ticket #{} for any follow-ups.",
            ticket.id,
            ticket.subject,
            ticket.priority.as_str().to_uppercase(),
            ticket.requester_name,
            ticket.requester_email,
            ticket.first_response_due.format("%Y-%m-%d %H:%M"),
            ticket.resolution_due.format("%Y-%m-%d %H:%M"),
            ticket.id,
        );
        Ok(ToolResult::ok(output).with_data(ticket_data(&ticket)))
    }
}

#[async_trait]
impl Tool for GetTicketTool {
    fn name(&self) -> &str {
        "get_ticket"
    }

    fn description(&self) -> &str {
        "Retrieve an existing ticket: status, priority, description, SLA state and comments."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "integer", "description": "The ticket number" }
            },
            "required": ["ticket_id"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let id = ticket_id(&arguments)?;
        let ticket = self.book.get(id).await.ok_or_else(|| not_found(id))?;
        let (response_breached, resolution_breached) = ticket.sla_breach(Utc::now());

        let mut output = format!(
            "**Ticket Details - #{}**\n\n**Subject**: {}\n**Status**: {}\n**Priority**: {}\n**Category**: {}\n**Requester**: {} ({})\n**Assignee**: {}\n**Tags**: {}\n**Due**: {}\n**Created**: {}\n**Last Updated**: {}\n**SLA**: first response {}, resolution {}\n\n**Description**:\n{}\n",
            ticket.id,
            ticket.subject,
            ticket.status.as_str().to_uppercase(),
            ticket.priority.as_str().to_uppercase(),
            ticket.category,
            ticket.requester_name,
            ticket.requester_email,
            ticket.assignee_name.as_deref().unwrap_or("Unassigned"),
            if ticket.tags.is_empty() { "none".to_string() } else { ticket.tags.join(", ") },
            ticket
                .due_date
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "Not set".into()),
            ticket.created_at.format("%Y-%m-%d %H:%M"),
            ticket.updated_at.format("%Y-%m-%d %H:%M"),
            if response_breached { "BREACHED" } else { "on track" },
            if resolution_breached { "BREACHED" } else { "on track" },
            ticket.description,
        );
        if !ticket.comments.is_empty() {
            output.push_str("\n**Comments/Updates:**\n");
            for (i, c) in ticket.comments.iter().enumerate() {
                output.push_str(&format!(
                    "\n{}. [{}] {}:\n   {}\n",
                    i + 1,
                    c.created_at.format("%Y-%m-%d %H:%M"),
                    c.author,
                    c.body
                ));
            }
        }
        Ok(ToolResult::ok(output).with_data(ticket_data(&ticket)))
    }
}

#[async_trait]
impl Tool for UpdateTicketStatusTool {
    fn name(&self) -> &str {
        "update_ticket_status"
    }

    fn description(&self) -> &str {
        "Change a ticket's status (new, open, pending, solved, closed), optionally adding a comment."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "integer" },
                "status": {
                    "type": "string",
                    "enum": ["new", "open", "pending", "solved", "closed"]
                },
                "comment": { "type": "string", "description": "Optional comment to add" }
            },
            "required": ["ticket_id", "status"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let id = ticket_id(&arguments)?;
        let status: Status = required_str(&arguments, "status")?.parse()?;
        let comment = optional_str(&arguments, "comment");

        let (previous, ticket) = self.book.update_status(id, status, comment.as_deref()).await?;

        let mut output = format!(
            "Ticket Status Updated!\n\n**Ticket ID**: #{}\n**Previous Status**: {}\n**New Status**: {}\n**Updated**: {}\n",
            ticket.id,
            previous.as_str().to_uppercase(),
            ticket.status.as_str().to_uppercase(),
            ticket.updated_at.format("%Y-%m-%d %H:%M"),
        );
        if let Some(comment) = comment {
            output.push_str(&format!("\n**Comment Added**:\n{comment}"));
        }
        Ok(ToolResult::ok(output).with_data(ticket_data(&ticket)))
    }
}

#[async_trait]
impl Tool for AddTicketCommentTool {
    fn name(&self) -> &str {
        "add_ticket_comment"
    }

    fn description(&self) -> &str {
        "Add a comment to a ticket: updates for the requester, requests for information, or internal notes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "integer" },
                "comment": { "type": "string" },
                "is_public": {
                    "type": "boolean",
                    "description": "Visible to the requester (default true)"
                }
            },
            "required": ["ticket_id", "comment"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let id = ticket_id(&arguments)?;
        let comment = required_str(&arguments, "comment")?;
        let public = arguments["is_public"].as_bool().unwrap_or(true);

        let ticket = self.book.add_comment(id, comment, public).await?;
        let output = format!(
            "Comment Added to Ticket!\n\n**Ticket ID**: #{}\n**Visibility**: {}\n\n**Comment**:\n{}\n\nThe requester {} be notified of this update.",
            ticket.id,
            if public { "Public" } else { "Internal" },
            comment,
            if public { "will" } else { "will NOT" },
        );
        Ok(ToolResult::ok(output).with_data(ticket_data(&ticket)))
    }
}

#[async_trait]
impl Tool for SearchTicketsTool {
    fn name(&self) -> &str {
        "search_tickets"
    }

    fn description(&self) -> &str {
        "Find tickets whose subject or description contains the given keywords, optionally filtered by status."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "status": {
                    "type": "string",
                    "enum": ["new", "open", "pending", "solved", "closed"]
                },
                "limit": { "type": "integer", "default": 5 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = required_str(&arguments, "query")?;
        let status = optional_str(&arguments, "status")
            .map(|s| s.parse::<Status>())
            .transpose()?;
        let limit = arguments["limit"].as_u64().unwrap_or(5).clamp(1, 50) as usize;

        let found = self.book.search(query, status, limit).await;
        if found.is_empty() {
            let filter = status
                .map(|s| format!(" with status '{}'", s.as_str()))
                .unwrap_or_default();
            return Ok(ToolResult::ok(format!("No tickets found matching '{query}'{filter}.")));
        }

        let mut output = format!("**Found {} ticket(s) matching '{query}':**\n\n", found.len());
        for t in &found {
            output.push_str(&ticket_summary(t));
            output.push('\n');
        }
        let data = serde_json::Value::Array(found.iter().map(ticket_data).collect());
        Ok(ToolResult::ok(output).with_data(data))
    }
}

#[async_trait]
impl Tool for UpdateTicketPriorityTool {
    fn name(&self) -> &str {
        "update_ticket_priority"
    }

    fn description(&self) -> &str {
        "Escalate or de-escalate a ticket's priority (low, normal, high, urgent). SLA due times are recalculated."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "integer" },
                "priority": {
                    "type": "string",
                    "enum": ["low", "normal", "high", "urgent"]
                }
            },
            "required": ["ticket_id", "priority"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let id = ticket_id(&arguments)?;
        let priority: Priority = required_str(&arguments, "priority")?.parse()?;

        let (previous, ticket) = self.book.update_priority(id, priority).await?;
        let output = format!(
            "Ticket Priority Updated!\n\n**Ticket ID**: #{}\n**Previous Priority**: {}\n**New Priority**: {}\n**Updated**: {}\n**First response due**: {}\n**Resolution due**: {}",
            ticket.id,
            previous.as_str().to_uppercase(),
            ticket.priority.as_str().to_uppercase(),
            ticket.updated_at.format("%Y-%m-%d %H:%M"),
            ticket.first_response_due.format("%Y-%m-%d %H:%M"),
            ticket.resolution_due.format("%Y-%m-%d %H:%M"),
        );
        Ok(ToolResult::ok(output).with_data(ticket_data(&ticket)))
    }
}

#[async_trait]
impl Tool for GetMyOpenTicketsTool {
    fn name(&self) -> &str {
        "get_my_open_tickets"
    }

    fn description(&self) -> &str {
        "List tickets that still need attention (new, open or pending), most urgent and oldest first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "default": 10 }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let limit = arguments["limit"].as_u64().unwrap_or(10).clamp(1, 50) as usize;

        let open = self.book.open_tickets(limit).await;
        if open.is_empty() {
            return Ok(ToolResult::ok(
                "No open tickets found. All tickets are either solved or closed.",
            ));
        }

        let mut output = format!("**Open Tickets ({}):**\n\n", open.len());
        for t in &open {
            output.push_str(&format!(
                "**#{}** - {}\n  Status: {} | Priority: {}\n  Created: {}\n  Requester: {} ({})\n\n",
                t.id,
                t.subject,
                t.status.as_str().to_uppercase(),
                t.priority.as_str().to_uppercase(),
                t.created_at.format("%Y-%m-%d %H:%M"),
                t.requester_name,
                t.requester_email,
            ));
        }
        let data = serde_json::Value::Array(open.iter().map(ticket_data).collect());
        Ok(ToolResult::ok(output).with_data(data))
    }
}

#[async_trait]
impl Tool for AssignTicketTool {
    fn name(&self) -> &str {
        "assign_ticket"
    }

    fn description(&self) -> &str {
        "Assign a ticket to a help-desk agent: agent_1 (Tech Support), agent_2 (Admin), agent_3 (Network) or agent_4 (Security)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let ids: Vec<&str> = SUPPORT_AGENTS.iter().map(|a| a.id).collect();
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "integer" },
                "assignee_id": { "type": "string", "enum": ids }
            },
            "required": ["ticket_id", "assignee_id"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let id = ticket_id(&arguments)?;
        let assignee = required_str(&arguments, "assignee_id")?.trim();
        let agent = SUPPORT_AGENTS.iter().find(|a| a.id == assignee).ok_or_else(|| {
            let available: Vec<&str> = SUPPORT_AGENTS.iter().map(|a| a.id).collect();
            ToolError::InvalidArguments(format!(
                "Invalid assignee ID '{assignee}'. Available agents: {}",
                available.join(", ")
            ))
        })?;

        let (previous, ticket) = self.book.assign(id, agent).await?;
        let output = format!(
            "Ticket Assigned Successfully!\n\n**Ticket ID**: #{}\n**Assigned To**: {} ({})\n**Previous Assignee**: {}\n\nThe assignee will be notified about this ticket.",
            ticket.id,
            agent.name,
            agent.email,
            previous.as_deref().unwrap_or("Unassigned"),
        );
        Ok(ToolResult::ok(output).with_data(ticket_data(&ticket)))
    }
}

#[async_trait]
impl Tool for AddTagsToTicketTool {
    fn name(&self) -> &str {
        "add_tags_to_ticket"
    }

    fn description(&self) -> &str {
        "Add keyword tags to a ticket (e.g. wifi, network). Tags are lowercased and never duplicated."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "integer" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["ticket_id", "tags"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let id = ticket_id(&arguments)?;
        let tags: Vec<String> = match &arguments["tags"] {
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            serde_json::Value::String(s) => s.split(',').map(str::to_string).collect(),
            _ => Vec::new(),
        };
        if tags.iter().all(|t| t.trim().is_empty()) {
            return Err(ToolError::InvalidArguments("Missing 'tags' argument".into()));
        }

        let (added, ticket) = self.book.add_tags(id, &tags).await?;
        if added.is_empty() {
            return Ok(ToolResult::ok(format!("All tags already exist on ticket #{id}."))
                .with_data(ticket_data(&ticket)));
        }
        let output = format!(
            "Tags Added Successfully!\n\n**Ticket ID**: #{}\n**New Tags**: {}\n**All Tags**: {}",
            ticket.id,
            added.join(", "),
            ticket.tags.join(", "),
        );
        Ok(ToolResult::ok(output).with_data(ticket_data(&ticket)))
    }
}

#[async_trait]
impl Tool for SetTicketCategoryTool {
    fn name(&self) -> &str {
        "set_ticket_category"
    }

    fn description(&self) -> &str {
        "Set a ticket's category so it routes to the right team."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "integer" },
                "category": { "type": "string", "enum": CATEGORIES }
            },
            "required": ["ticket_id", "category"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let id = ticket_id(&arguments)?;
        let category = required_str(&arguments, "category")?.trim().to_lowercase();
        if !CATEGORIES.contains(&category.as_str()) {
            return Err(ToolError::InvalidArguments(format!(
                "Invalid category '{category}'. Valid options: {}",
                CATEGORIES.join(", ")
            )));
        }

        let (previous, ticket) = self.book.set_category(id, &category).await?;
        let output = format!(
            "Category Updated Successfully!\n\n**Ticket ID**: #{}\n**Previous Category**: {}\n**New Category**: {}",
            ticket.id, previous, ticket.category,
        );
        Ok(ToolResult::ok(output).with_data(ticket_data(&ticket)))
    }
}

#[async_trait]
impl Tool for SetTicketDueDateTool {
    fn name(&self) -> &str {
        "set_ticket_due_date"
    }

    fn description(&self) -> &str {
        "Set a deadline for resolving a ticket (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS, UTC)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "integer" },
                "due_date": { "type": "string" }
            },
            "required": ["ticket_id", "due_date"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let id = ticket_id(&arguments)?;
        let due = parse_due_date(required_str(&arguments, "due_date")?)?;

        let (previous, ticket) = self.book.set_due_date(id, due).await?;
        let output = format!(
            "Due Date Set Successfully!\n\n**Ticket ID**: #{}\n**Due Date**: {}\n**Previous Due Date**: {}",
            ticket.id,
            due.format("%Y-%m-%d %H:%M"),
            previous
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "Not set".into()),
        );
        Ok(ToolResult::ok(output).with_data(ticket_data(&ticket)))
    }
}

#[async_trait]
impl Tool for DeleteTicketTool {
    fn name(&self) -> &str {
        "delete_ticket"
    }

    fn description(&self) -> &str {
        "Permanently delete a ticket created by mistake or duplicated. Cannot be undone."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ticket_id": { "type": "integer" }
            },
            "required": ["ticket_id"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let id = ticket_id(&arguments)?;
        let ticket = self.book.delete(id).await?;
        let output = format!(
            "Ticket Deleted Successfully!\n\n**Ticket ID**: #{}\n**Subject**: {}\n\nThe ticket has been permanently deleted. This action cannot be undone.",
            ticket.id, ticket.subject,
        );
        Ok(ToolResult::ok(output).with_data(ticket_data(&ticket)))
    }
}
