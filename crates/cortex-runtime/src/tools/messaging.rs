use chrono::Utc;
use cortex_store::NewMessage;
use cortex_types::{AgentMessage, MessagePriority, time_delta_label};
use serde_json::{Value, json};

use super::{ToolResponse, arg_bool, arg_str, arg_usize, require_str};
use crate::runtime::Cortex;

/// The messaging facade: send / inbox / read / ack / history over the
/// store's message tables.
pub fn synapse(cortex: &Cortex, args: &Value) -> ToolResponse {
    let action = match require_str(args, "action") {
        Ok(action) => action,
        Err(resp) => return resp,
    };
    match action {
        "send" => send(cortex, args),
        "inbox" => inbox(cortex, args),
        "read" => read(cortex, args),
        "ack" => ack(cortex, args),
        "history" => history(cortex, args),
        other => ToolResponse::with_details(
            format!("Unknown synapse action '{}'", other),
            json!({"error": "validation_error"}),
        ),
    }
}

fn send(cortex: &Cortex, args: &Value) -> ToolResponse {
    let to = match require_str(args, "to") {
        Ok(to) => to,
        Err(resp) => return resp,
    };
    let body = match require_str(args, "body") {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let priority = match arg_str(args, "priority") {
        Some(raw) => match MessagePriority::parse(raw) {
            Some(priority) => priority,
            None => {
                return ToolResponse::with_details(
                    format!("Unknown priority '{}'", raw),
                    json!({"error": "validation_error"}),
                );
            }
        },
        None => MessagePriority::Info,
    };

    let new = NewMessage {
        from_agent: cortex.agent_id.clone(),
        to_agent: to.to_string(),
        subject: arg_str(args, "subject").unwrap_or("(no subject)").to_string(),
        body: body.to_string(),
        priority,
        thread_id: arg_str(args, "thread_id").map(str::to_string),
    };
    match cortex.store.lock().expect("store mutex poisoned").send_message(new) {
        Ok(message) => ToolResponse::with_details(
            format!("Sent {} message {} to {}", priority.as_str(), &message.id[..8], to),
            json!({
                "message_id": message.id,
                "thread_id": message.thread_id,
                "priority": priority.as_str(),
            }),
        ),
        Err(err) => err.into(),
    }
}

fn inbox(cortex: &Cortex, args: &Value) -> ToolResponse {
    let agent = arg_str(args, "agent_id").unwrap_or(&cortex.agent_id);
    let include_read = arg_bool(args, "include_read").unwrap_or(false);

    let messages = match cortex
        .store
        .lock()
        .expect("store mutex poisoned")
        .inbox(agent, include_read)
    {
        Ok(messages) => messages,
        Err(err) => return err.into(),
    };
    if messages.is_empty() {
        return ToolResponse::with_details("Inbox empty", json!({"count": 0}));
    }
    let lines: Vec<String> = messages.iter().map(render_message).collect();
    ToolResponse::with_details(
        lines.join("\n"),
        json!({
            "count": messages.len(),
            "ids": messages.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        }),
    )
}

fn read(cortex: &Cortex, args: &Value) -> ToolResponse {
    let message_id = match require_str(args, "message_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let agent = arg_str(args, "agent_id").unwrap_or(&cortex.agent_id);

    match cortex
        .store
        .lock()
        .expect("store mutex poisoned")
        .read_message(message_id, agent)
    {
        Ok(message) => ToolResponse::with_details(
            format!(
                "From {} [{}]: {}\n{}",
                message.from_agent,
                message.priority.as_str(),
                message.subject,
                message.body
            ),
            json!({"message_id": message.id, "thread_id": message.thread_id}),
        ),
        Err(err) => err.into(),
    }
}

fn ack(cortex: &Cortex, args: &Value) -> ToolResponse {
    let message_id = match require_str(args, "message_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let agent = arg_str(args, "agent_id").unwrap_or(&cortex.agent_id);
    let body = arg_str(args, "body").map(str::to_string);

    match cortex
        .store
        .lock()
        .expect("store mutex poisoned")
        .ack_message(message_id, agent, body)
    {
        Ok(message) => ToolResponse::with_details(
            format!("Acknowledged message {}", &message.id[..8]),
            json!({"message_id": message.id, "acked_at": message.acked_at}),
        ),
        Err(err) => err.into(),
    }
}

fn history(cortex: &Cortex, args: &Value) -> ToolResponse {
    let thread_id = arg_str(args, "thread_id");
    let agent = arg_str(args, "agent_id");
    let limit = arg_usize(args, "limit").unwrap_or(20).min(100);

    let messages = match cortex
        .store
        .lock()
        .expect("store mutex poisoned")
        .message_history(thread_id, agent, limit)
    {
        Ok(messages) => messages,
        Err(err) => return err.into(),
    };
    if messages.is_empty() {
        return ToolResponse::with_details("No message history", json!({"count": 0}));
    }
    let lines: Vec<String> = messages.iter().map(render_message).collect();
    ToolResponse::with_details(lines.join("\n"), json!({"count": messages.len()}))
}

fn render_message(message: &AgentMessage) -> String {
    let status = if message.acked_at.is_some() {
        "acked"
    } else if message.read_at.is_some() {
        "read"
    } else {
        "unread"
    };
    format!(
        "[{}] {} -> {} ({}, {}, {}): {}",
        &message.id[..8],
        message.from_agent,
        message.to_agent,
        message.priority.as_str(),
        status,
        time_delta_label(message.sent_at, Utc::now()),
        message.subject
    )
}
