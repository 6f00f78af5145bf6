//! Create payloads.
//!
//! A payload starts from the source record's fields without the identifier
//! field and without dropped fields. Resolved references are then written
//! back: include parents from the remap table, match-by-key parents from the
//! resolver. Deferred references stay out until the update pass.

use serde_json::Value;

use crate::{
    Result,
    graph::{KeyReference, RecordNode, ReferenceKind},
    model::{Fields, RecordKey},
    result::{ErrorKind, RecordError},
    runtime::Context,
};

/// A record ready to be sent to the target store.
#[derive(Debug, Clone)]
pub(crate) struct Payload {
    pub key: RecordKey,
    pub source_ref: String,
    pub fields: Fields,
}

#[derive(Debug)]
pub(crate) enum Prepared {
    /// Payload plus non-blocking problems (optional references left out).
    Ready(Payload, Vec<RecordError>),
    /// Not attempted.
    Blocked(RecordError),
}

fn describe_miss(
    object_type: &str,
    reference: &KeyReference,
) -> String {
    match (&reference.key_field, &reference.fallback) {
        (Some(key_field), _) => format!("no {} with {} = {}", object_type, key_field, reference.key_value),
        (None, Some((key_field, key_value))) => format!("no {} with id {} or {} = {}", object_type, reference.key_value, key_field, key_value),
        (None, None) => format!("no {} with id {}", object_type, reference.key_value),
    }
}

/// Build the create payload of one record.
///
/// Only a fatal store error is returned as `Err`; every other problem is
/// reported through [`Prepared`].
pub(crate) async fn prepare(
    ctx: &Context,
    node: &RecordNode,
) -> Result<Prepared> {
    let key = node.key();
    let source_ref = node.record.display_ref(ctx.display_fields());

    let mut fields: Fields = node
        .record
        .fields
        .iter()
        .filter(|(name, _)| name.as_str() != ctx.id_field() && !node.dropped_fields.contains(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let mut notes = Vec::new();

    for reference in &node.references {
        match &reference.kind {
            ReferenceKind::Deferred => {}
            ReferenceKind::Include => match ctx.remap().get(&reference.target) {
                Some(target_id) => {
                    fields.insert(reference.field_name.clone(), Value::String(target_id));
                }
                None => {
                    let error = RecordError::new(ErrorKind::ParentNotCreated, key, source_ref, format!("parent {} was not created", reference.target))
                        .on_field(&reference.field_name);
                    return Ok(Prepared::Blocked(error));
                }
            },
            ReferenceKind::MatchByKey(key_reference) => {
                let object_type = &reference.target.object_type;
                let found = match ctx.resolver().resolve_reference(object_type, key_reference).await {
                    Ok(Some(target_id)) => Ok(target_id),
                    Ok(None) => Err(describe_miss(object_type, key_reference)),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => Err(format!("{}: {}", describe_miss(object_type, key_reference), e)),
                };

                match found {
                    Ok(target_id) => {
                        fields.insert(reference.field_name.clone(), Value::String(target_id));
                    }
                    Err(message) => {
                        let error = RecordError::new(ErrorKind::ExternalKeyNotFound, key.clone(), source_ref.clone(), message).on_field(&reference.field_name);
                        if reference.required {
                            return Ok(Prepared::Blocked(error));
                        }
                        notes.push(error);
                    }
                }
            }
        }
    }

    Ok(Prepared::Ready(
        Payload {
            key,
            source_ref,
            fields,
        },
        notes,
    ))
}
