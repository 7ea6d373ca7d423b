use serde::Serialize;

use svr_core::{Channel, ChannelId, NewChannel, SvrConfig};

use crate::{render, ChannelCommands, DisplayFallback, OutputFormat, Result};

use super::open_library;

#[derive(Debug, Serialize)]
pub struct ChannelRow {
    pub id: i64,
    pub name: String,
    pub source_url: String,
    pub favorite: bool,
    pub paused: bool,
    pub min_duration_minutes: u32,
}

impl From<&Channel> for ChannelRow {
    fn from(channel: &Channel) -> Self {
        Self {
            id: channel.id.0,
            name: channel.name.clone(),
            source_url: channel.source_url.clone(),
            favorite: channel.is_favorite,
            paused: channel.is_paused,
            min_duration_minutes: channel.min_duration_minutes,
        }
    }
}

impl DisplayFallback for Vec<ChannelRow> {
    fn display(&self) -> String {
        if self.is_empty() {
            return String::from("no channels");
        }
        let mut out = format!("{:<5} {:<20} {:<5} {:<7} {:<6} url\n", "id", "name", "fav", "paused", "min");
        for row in self {
            out.push_str(&format!(
                "{:<5} {:<20} {:<5} {:<7} {:<6} {}\n",
                row.id, row.name, row.favorite, row.paused, row.min_duration_minutes, row.source_url
            ));
        }
        out.trim_end().to_string()
    }
}

impl DisplayFallback for ChannelRow {
    fn display(&self) -> String {
        format!("channel {} ({}) registered", self.id, self.name)
    }
}

pub fn run(config: &SvrConfig, command: &ChannelCommands, format: OutputFormat) -> Result<()> {
    let library = open_library(config)?;
    match command {
        ChannelCommands::Add(args) => {
            let channel = library.create_channel(&NewChannel {
                name: args.name.clone(),
                display_name: args
                    .display_name
                    .clone()
                    .unwrap_or_else(|| args.name.clone()),
                source_url: args.url.clone(),
                skip_start_seconds: args.skip_start,
                min_duration_minutes: args.min_duration,
                is_favorite: args.favorite,
            })?;
            render(&ChannelRow::from(&channel), format)
        }
        ChannelCommands::List => {
            let rows: Vec<ChannelRow> = library
                .list_channels()?
                .iter()
                .map(ChannelRow::from)
                .collect();
            render(&rows, format)
        }
        ChannelCommands::Pause(args) => {
            library.set_paused(ChannelId(args.id), true)?;
            println!("channel {} paused", args.id);
            Ok(())
        }
        ChannelCommands::Resume(args) => {
            library.set_paused(ChannelId(args.id), false)?;
            println!("channel {} resumed", args.id);
            Ok(())
        }
        ChannelCommands::Favorite(args) => {
            library.set_favorite(ChannelId(args.id), args.value)?;
            println!("channel {} favorite = {}", args.id, args.value);
            Ok(())
        }
        ChannelCommands::MinDuration(args) => {
            library.set_min_duration(ChannelId(args.id), args.minutes)?;
            println!("channel {} min duration = {} minutes", args.id, args.minutes);
            Ok(())
        }
    }
}
