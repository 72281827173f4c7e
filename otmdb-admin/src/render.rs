//! Plain-text and JSON output for console commands

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use otmdb_common::pagination::Connection;
use otmdb_core::event_log::{TagEventType, TypedEvent};
use otmdb_core::models::{RegistrationRequest, Tag, TagParent, VideoDetail};
use otmdb_core::timeline::TimelineEntry;
use otmdb_core::{RegistrationDetail, TagType};
use serde::Serialize;

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn tag_type_label(tag_type: &TagType) -> String {
    match tag_type {
        TagType::Category(Some(c)) => format!("category ({c})"),
        TagType::Category(None) => "category".to_string(),
        TagType::Typed(c) => c.to_string(),
        TagType::Subtle => "subtle".to_string(),
        TagType::Unknown => "unknown".to_string(),
    }
}

pub fn tag(
    out: &mut dyn Write,
    tag: &Tag,
    tag_type: &TagType,
    explicit: Option<&TagParent>,
    events: &[TypedEvent<TagEventType>],
) -> Result<()> {
    writeln!(out, "tag {}", tag.id)?;
    writeln!(out, "  primary: {}", tag.primary_name().unwrap_or("-"))?;
    for name in tag.names.iter().filter(|n| !n.is_primary) {
        writeln!(out, "  alias:   {}", name.name)?;
    }
    writeln!(out, "  type:    {}", tag_type_label(tag_type))?;
    if let Some(edge) = explicit {
        writeln!(out, "  explicit parent: {} (edge {})", edge.parent_id, edge.id)?;
    }
    writeln!(out, "  created: {} by {}", ts(&tag.created_at), tag.created_by)?;
    if !events.is_empty() {
        writeln!(out, "  events:")?;
        for event in events {
            writeln!(
                out,
                "    #{} {} {} by {}",
                event.id,
                ts(&event.created_at),
                event.event_type,
                event.user_id
            )?;
        }
    }
    Ok(())
}

pub fn video(out: &mut dyn Write, detail: &VideoDetail) -> Result<()> {
    let video = &detail.video;
    writeln!(out, "video {}", video.id)?;
    writeln!(out, "  title:   {}", video.title)?;
    for source in &detail.sources {
        writeln!(out, "  source:  {} {}", source.source, source.source_id)?;
    }
    let active: Vec<_> = detail.tags.iter().filter(|t| !t.is_removed).collect();
    writeln!(out, "  tags:    {}", active.len())?;
    for tagging in active {
        writeln!(out, "    {}", tagging.tag_id)?;
    }
    for semitag in &detail.semitags {
        let state = if semitag.is_checked { "checked" } else { "pending" };
        writeln!(out, "  semitag: {} [{}]", semitag.name, state)?;
    }
    writeln!(out, "  created: {} by {}", ts(&video.created_at), video.created_by)?;
    Ok(())
}

pub fn pending(out: &mut dyn Write, page: &Connection<RegistrationRequest>) -> Result<()> {
    if page.edges.is_empty() {
        writeln!(out, "no pending requests")?;
        return Ok(());
    }
    for edge in &page.edges {
        let r = &edge.node;
        writeln!(
            out,
            "{}  {} {}  {:?}  by {} at {}",
            r.id,
            r.source,
            r.source_id,
            r.title,
            r.requested_by,
            ts(&r.created_at)
        )?;
    }
    writeln!(out, "{} of {} shown", page.edges.len(), page.total_count)?;
    if page.page_info.has_next_page {
        if let Some(cursor) = &page.page_info.end_cursor {
            writeln!(out, "more: --after {cursor}")?;
        }
    }
    Ok(())
}

pub fn request(out: &mut dyn Write, detail: &RegistrationDetail, url: &str) -> Result<()> {
    let r = &detail.request;
    writeln!(out, "request {}", r.id)?;
    writeln!(out, "  source:  {} {}", r.source, r.source_id)?;
    writeln!(out, "  url:     {url}")?;
    writeln!(out, "  title:   {}", r.title)?;
    writeln!(out, "  by:      {} at {}", r.requested_by, ts(&r.created_at))?;
    for tagging in &detail.taggings {
        writeln!(out, "  tag:     {}", tagging.tag_id)?;
    }
    for semitagging in &detail.semitaggings {
        writeln!(out, "  semitag: {}", semitagging.name)?;
    }
    match &detail.checking {
        None => writeln!(out, "  status:  pending")?,
        Some(c) => {
            let verdict = match c.video_id {
                Some(video_id) => format!("accepted as {video_id}"),
                None => "rejected".to_string(),
            };
            writeln!(out, "  status:  {} by {} at {}", verdict, c.checked_by, ts(&c.created_at))?;
            if let Some(note) = &c.note {
                writeln!(out, "  note:    {note}")?;
            }
        }
    }
    Ok(())
}

pub fn timeline(out: &mut dyn Write, entries: &[TimelineEntry], next_cursor: Option<&str>) -> Result<()> {
    for entry in entries {
        let line = match entry {
            TimelineEntry::MadRegistered {
                video_id,
                user_id,
                title,
                ..
            } => format!("registered  {video_id} {title:?} by {user_id}"),
            TimelineEntry::RegistrationRequested {
                request_id,
                user_id,
                source,
                source_id,
                ..
            } => format!("requested   {request_id} {source} {source_id} by {user_id}"),
            TimelineEntry::RegistrationAccepted {
                request_id,
                video_id,
                user_id,
                ..
            } => format!("accepted    {request_id} -> {video_id} by {user_id}"),
            TimelineEntry::RegistrationRejected {
                request_id,
                user_id,
                ..
            } => format!("rejected    {request_id} by {user_id}"),
        };
        writeln!(out, "{}  {}", ts(&entry.created_at()), line)?;
    }
    if let Some(cursor) = next_cursor {
        writeln!(out, "more: --after {cursor}")?;
    }
    Ok(())
}
