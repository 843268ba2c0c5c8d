//! Thread lookup across equivalent recipient forms.
//!
//! A thread created against a phone number must still match when the reply
//! arrives from the paired WhatsApp business id (and vice versa), so the
//! candidate set is the sender's own forms plus the contact's paired
//! identifier forms. An unseen business id whose pairing is discovered here
//! is recorded on the contact for next time.

use chrono::Utc;
use tracing::info;

use switchboard_contacts::candidates::{
    candidate_identifiers, extend_with_identifier, normalize_sender,
};
use switchboard_contacts::ContactDirectory;
use switchboard_core::types::TenantId;

use crate::db::ThreadStore;
use crate::types::ConversationThread;

/// All recipient forms an inbound sender could have been addressed as.
pub fn recipient_candidates(
    directory: &ContactDirectory,
    tenant: &TenantId,
    sender: &str,
) -> Vec<String> {
    let mut candidates = candidate_identifiers(sender);
    let normalized = normalize_sender(sender);

    // Bidirectional phone ↔ WhatsApp-id cross lookup via the contact row.
    if let Ok(Some((phone, whatsapp_id))) = directory.paired_identifiers(tenant, &normalized) {
        if let Some(phone) = phone {
            extend_with_identifier(&mut candidates, &phone);
        }
        if let Some(wa_id) = whatsapp_id {
            extend_with_identifier(&mut candidates, &wa_id);
        }
    }
    candidates
}

/// Find the active thread matching this sender, trying every candidate
/// form. When the sender is a previously unseen `@lid` business id and a
/// contact resolves through the thread match, the pairing is recorded.
pub fn find_active_thread(
    store: &ThreadStore,
    directory: &ContactDirectory,
    tenant: &TenantId,
    sender: &str,
) -> Option<ConversationThread> {
    let candidates = recipient_candidates(directory, tenant, sender);
    let thread = store
        .find_active_for_recipients(tenant, &candidates)
        .ok()
        .flatten()?;

    // Auto-discovery: a business-id reply matched a phone-keyed thread and
    // the contact doesn't know the business id yet.
    if sender.ends_with("@lid") {
        let normalized = normalize_sender(sender);
        let thread_recipient_norm = normalize_sender(&thread.recipient);
        if normalized != thread_recipient_norm {
            if let Ok(Some(contact)) = directory.resolve_sender(tenant, &thread.recipient) {
                if contact.whatsapp_id.is_none() {
                    info!(
                        contact = %contact.friendly_name,
                        business_id = %normalized,
                        "auto-discovered WhatsApp business id via thread match"
                    );
                    let _ = directory.link_whatsapp_business_id(tenant, contact.id, &normalized);
                }
            }
        }
    }

    Some(thread)
}

/// Seconds since the most recent closed thread for this sender, or `None`
/// when there is none inside the window.
pub fn seconds_since_completion(
    store: &ThreadStore,
    tenant: &TenantId,
    sender: &str,
    window_secs: i64,
) -> Option<(i64, bool)> {
    let normalized = normalize_sender(sender);
    let now = Utc::now();
    let thread = store
        .recent_completed_for_sender(tenant, &normalized, window_secs, now)
        .ok()
        .flatten()?;
    let completed_at = thread.completed_at?;
    let forced = thread
        .goal_summary
        .as_deref()
        .map(|s| s.contains("FORCED CLOSURE"))
        .unwrap_or(false);
    Some(((now - completed_at).num_seconds(), forced))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use switchboard_contacts::types::ContactRole;

    fn setup() -> (ThreadStore, ContactDirectory, TenantId) {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        switchboard_contacts::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        (
            ThreadStore::new(Arc::clone(&db)),
            ContactDirectory::new(db),
            TenantId::default_tenant(),
        )
    }

    #[test]
    fn jid_reply_matches_phone_keyed_thread() {
        let (store, directory, tenant) = setup();
        store
            .create(&tenant, 1, "5511777770000", "obj", 10, None)
            .unwrap();

        let hit = find_active_thread(
            &store,
            &directory,
            &tenant,
            "5511777770000@s.whatsapp.net",
        );
        assert!(hit.is_some());
    }

    #[test]
    fn business_id_matches_via_contact_pairing() {
        let (store, directory, tenant) = setup();
        let contact = directory
            .create_contact(&tenant, "Courier", ContactRole::User, Some("5511777770000"), None)
            .unwrap();
        directory
            .link_whatsapp_business_id(&tenant, contact.id, "193853382488108")
            .unwrap();
        store
            .create(&tenant, 1, "5511777770000", "obj", 10, None)
            .unwrap();

        let hit = find_active_thread(&store, &directory, &tenant, "193853382488108@lid");
        assert!(hit.is_some());
    }

    #[test]
    fn unrelated_sender_matches_nothing() {
        let (store, directory, tenant) = setup();
        store.create(&tenant, 1, "5511777770000", "obj", 10, None).unwrap();
        assert!(find_active_thread(&store, &directory, &tenant, "5599999999999").is_none());
    }
}
