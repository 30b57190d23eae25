use std::sync::Arc;

use super::machine::Effect;
use crate::ticket::Ticket;
use crate::tracker::ProgressSink;

/// Delivers transition effects to the progress sink.
///
/// Effects are applied in order. A rejected document is logged and dropped;
/// the run continues regardless.
pub struct EffectHandler {
    sink: Arc<dyn ProgressSink>,
}

impl EffectHandler {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink }
    }

    /// Returns how many documents the sink accepted.
    pub async fn apply(&self, ticket: &Ticket, effects: Vec<Effect>) -> usize {
        let internal_id = (!ticket.internal_id.is_empty()).then_some(ticket.internal_id.as_str());
        let mut delivered = 0;
        for effect in effects {
            match effect {
                Effect::PostProgress(doc) => {
                    let posted = self
                        .sink
                        .post_comment(&ticket.identifier, &doc.body, internal_id)
                        .await;
                    if posted {
                        delivered += 1;
                        tracing::debug!(ticket = %ticket.identifier, document = %doc.label, "progress posted");
                    } else {
                        tracing::warn!(
                            ticket = %ticket.identifier,
                            document = %doc.label,
                            "failed to post progress document"
                        );
                    }
                }
            }
        }
        delivered
    }
}
