use chatsync_core::models::ChatId;

use crate::commands::common::{
    format_chat_lines, format_message_lines, format_timestamp, print_json, Facade,
};
use crate::error::CliError;

pub async fn run_chats_list(facade: &Facade, limit: usize, as_json: bool) -> Result<(), CliError> {
    let mut chats = facade.chat_list().await?;
    chats.truncate(limit);

    if as_json {
        return print_json(&chats);
    }

    if chats.is_empty() {
        println!("No chats. Run `chatsync sync chats` to pull them.");
        return Ok(());
    }
    for line in format_chat_lines(&chats) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_chats_show(facade: &Facade, id: &str, as_json: bool) -> Result<(), CliError> {
    let chat_id = parse_chat_id(id)?;
    let chat = facade.chat(chat_id).await?;

    if as_json {
        return print_json(&chat);
    }

    println!("{} ({})", chat.name, chat.id);
    if !chat.participants.is_empty() {
        let names = chat
            .participants
            .iter()
            .map(|participant| participant.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        println!("Participants: {names}");
    }
    if let Some(at) = chat.last_activity_at {
        println!("Last activity: {}", format_timestamp(at));
    }
    println!();
    for line in format_message_lines(&chat.messages) {
        println!("{line}");
    }
    Ok(())
}

pub fn parse_chat_id(id: &str) -> Result<ChatId, CliError> {
    let trimmed = id.trim();
    trimmed
        .parse::<ChatId>()
        .map_err(|_| CliError::InvalidChatId(trimmed.to_string()))
}
