//! Built-in tool implementations for deskloop.
//!
//! Tools give the support assistant the ability to act: read the clock,
//! search IT policy and troubleshooting documents, and track help-desk
//! tickets.

pub mod document_search;
pub mod tickets;
pub mod time;

use deskloop_core::tool::ToolRegistry;
use std::sync::Arc;

pub use document_search::{DocumentIndex, SearchScope};
pub use tickets::TicketBook;

/// Create the default tool registry with all built-in tools.
///
/// The document tools share `index`; the ticket tools share `tickets`.
pub fn default_registry(index: Arc<DocumentIndex>, tickets: Arc<TicketBook>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(time::CurrentTimeTool));
    registry.register(Box::new(document_search::SearchDocumentsTool::new(
        index.clone(),
        SearchScope::Policy,
    )));
    registry.register(Box::new(document_search::SearchDocumentsTool::new(
        index.clone(),
        SearchScope::Troubleshooting,
    )));
    registry.register(Box::new(document_search::SearchDocumentsTool::new(
        index,
        SearchScope::All,
    )));
    registry.register(Box::new(tickets::CreateTicketTool::new(tickets.clone())));
    registry.register(Box::new(tickets::GetTicketTool::new(tickets.clone())));
    registry.register(Box::new(tickets::UpdateTicketStatusTool::new(tickets.clone())));
    registry.register(Box::new(tickets::AddTicketCommentTool::new(tickets.clone())));
    registry.register(Box::new(tickets::SearchTicketsTool::new(tickets.clone())));
    registry.register(Box::new(tickets::UpdateTicketPriorityTool::new(tickets.clone())));
    registry.register(Box::new(tickets::GetMyOpenTicketsTool::new(tickets.clone())));
    registry.register(Box::new(tickets::AssignTicketTool::new(tickets.clone())));
    registry.register(Box::new(tickets::AddTagsToTicketTool::new(tickets.clone())));
    registry.register(Box::new(tickets::SetTicketCategoryTool::new(tickets.clone())));
    registry.register(Box::new(tickets::SetTicketDueDateTool::new(tickets.clone())));
    registry.register(Box::new(tickets::DeleteTicketTool::new(tickets)));
    registry
}
