//! Built-in personal-information schema.
//!
//! Kinds: `pim/ContentItem` (abstract base), `pim/Note`, `pim/Event`,
//! `pim/Contact`, `pim/MailMessage`. Events and contacts are linked through
//! the `attendees`/`events` reference pair.

use crate::model::value::ValueType;
use crate::schema::kind::AttrDef;
use crate::schema::registry::{IndexDef, Schema, SchemaBuilder};
use crate::schema::SchemaResult;

pub const CONTENT_ITEM: &str = "pim/ContentItem";
pub const NOTE: &str = "pim/Note";
pub const EVENT: &str = "pim/Event";
pub const CONTACT: &str = "pim/Contact";
pub const MAIL_MESSAGE: &str = "pim/MailMessage";

/// Index maintained for every event.
pub const EVENTS_INDEX: &str = "events";

/// Declarations of the PIM kinds, for callers extending the schema.
pub fn pim_builder() -> SchemaBuilder {
    SchemaBuilder::new()
        .kind(
            CONTENT_ITEM,
            &[],
            vec![
                AttrDef::value("title", ValueType::String).required(),
                AttrDef::value("body", ValueType::String),
                AttrDef::value("tags", ValueType::String).list(),
                AttrDef::value("created_at", ValueType::DateTime),
            ],
        )
        .kind(NOTE, &[CONTENT_ITEM], vec![])
        .kind(
            EVENT,
            &[CONTENT_ITEM],
            vec![
                AttrDef::value("start", ValueType::DateTime),
                AttrDef::value("end", ValueType::DateTime),
                AttrDef::value("location", ValueType::String),
                AttrDef::value("all_day", ValueType::Boolean).with_default(false),
                AttrDef::reference("attendees", CONTACT, "events").list(),
            ],
        )
        .kind(
            CONTACT,
            &[],
            vec![
                AttrDef::value("display_name", ValueType::String).required(),
                AttrDef::value("email", ValueType::String),
                AttrDef::value("phones", ValueType::String).dict(),
                AttrDef::reference("events", EVENT, "attendees").list(),
                AttrDef::reference("messages", MAIL_MESSAGE, "from").list(),
            ],
        )
        .kind(
            MAIL_MESSAGE,
            &[CONTENT_ITEM],
            vec![
                AttrDef::value("sent_at", ValueType::DateTime),
                AttrDef::reference("from", CONTACT, "messages"),
            ],
        )
        .index(IndexDef::for_kind(EVENTS_INDEX, EVENT))
}

/// Resolved PIM schema.
pub fn pim_schema() -> SchemaResult<Schema> {
    pim_builder().build()
}
