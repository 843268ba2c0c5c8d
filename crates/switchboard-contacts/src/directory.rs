use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;
use tracing::{debug, info};

use switchboard_core::types::{AgentId, ContactId, TenantId};

use crate::candidates::{candidate_identifiers, normalize_sender};
use crate::error::Result;
use crate::types::{ChannelIdentifierKind, Contact, ContactRole};

/// Resolver cache entries expire after 5 minutes.
const CACHE_TTL: Duration = Duration::from_secs(300);
/// Maximum cache entries before LRU eviction.
const CACHE_CAP: usize = 1_000;

/// The only way to turn a raw sender string into a canonical contact.
///
/// Resolution order, first hit wins: channel-mapping index, legacy contact
/// columns (phone/whatsapp id), then auto-creation of an anonymous contact
/// for group participants. Lookups are cached; any write invalidates the
/// entire cache because a relink can change arbitrarily many keys.
pub struct ContactDirectory {
    db: Arc<Mutex<Connection>>,
    /// (tenant, kind, identifier) → (contact id, cached-at).
    cache: Mutex<HashMap<(String, String, String), (ContactId, Instant)>>,
}

impl ContactDirectory {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self {
            db,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a contact by a single (kind, identifier) pair.
    pub fn resolve(
        &self,
        tenant: &TenantId,
        kind: ChannelIdentifierKind,
        identifier: &str,
    ) -> Result<Option<Contact>> {
        let cache_key = (
            tenant.as_str().to_string(),
            kind.as_str().to_string(),
            identifier.to_string(),
        );

        if let Some(id) = self.cache_lookup(&cache_key) {
            debug!(tenant = %tenant, kind = %kind, identifier, "contact cache hit");
            if let Some(contact) = self.get(id)? {
                return Ok(Some(contact));
            }
            // Row deleted behind the cache; fall through to a fresh query.
        }

        let conn = self.db.lock().unwrap();
        let contact = self.query_by_mapping(&conn, tenant, kind, identifier)?;
        let contact = match contact {
            Some(c) => Some(c),
            None => self.query_legacy_columns(&conn, tenant, kind, identifier)?,
        };
        drop(conn);

        if let Some(ref c) = contact {
            self.cache_insert(cache_key, c.id);
        }
        Ok(contact)
    }

    /// Resolve a raw sender string by trying every equivalent identifier
    /// form against both the WhatsApp identity kinds.
    pub fn resolve_sender(&self, tenant: &TenantId, raw_sender: &str) -> Result<Option<Contact>> {
        for form in candidate_identifiers(raw_sender) {
            for kind in [
                ChannelIdentifierKind::Phone,
                ChannelIdentifierKind::WhatsappId,
            ] {
                if let Some(contact) = self.resolve(tenant, kind, &form)? {
                    return Ok(Some(contact));
                }
            }
        }
        Ok(None)
    }

    /// Resolve a group participant, creating an anonymous contact (and its
    /// channel mapping) on a miss so later messages resolve consistently.
    pub fn ensure_group_sender(
        &self,
        tenant: &TenantId,
        raw_sender: &str,
        sender_name: Option<&str>,
    ) -> Result<Contact> {
        if let Some(contact) = self.resolve_sender(tenant, raw_sender)? {
            return Ok(contact);
        }

        let normalized = normalize_sender(raw_sender);
        let name = sender_name
            .filter(|n| !n.is_empty())
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("whatsapp:{}", normalized));

        info!(tenant = %tenant, sender = raw_sender, "unknown group sender; creating anonymous contact");
        let contact = self.create_contact(tenant, &name, ContactRole::User, Some(&normalized), None)?;
        self.record_mapping(
            tenant,
            contact.id,
            ChannelIdentifierKind::Phone,
            &normalized,
        )?;
        Ok(contact)
    }

    /// Find an agent contact mentioned as `@friendly_name` in the body.
    /// Matching is case-insensitive on the name token after `@`.
    pub fn mentioned_agent(&self, tenant: &TenantId, body: &str) -> Result<Option<Contact>> {
        let agents = self.agent_contacts(tenant)?;
        if agents.is_empty() {
            return Ok(None);
        }

        let body_lower = body.to_lowercase();
        for contact in agents {
            let mention = format!("@{}", contact.friendly_name.to_lowercase());
            if body_lower.contains(&mention) {
                return Ok(Some(contact));
            }
        }
        Ok(None)
    }

    /// Cross-lookup for thread matching: given a normalized identifier,
    /// return the contact's paired (phone, whatsapp id) columns if either
    /// side matches.
    pub fn paired_identifiers(
        &self,
        tenant: &TenantId,
        normalized: &str,
    ) -> Result<Option<(Option<String>, Option<String>)>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT phone_number, whatsapp_id FROM contacts
             WHERE tenant_id = ?1
               AND (whatsapp_id = ?2
                    OR phone_number = ?2
                    OR phone_number = '+' || ?2)
             LIMIT 1",
        )?;
        let row = stmt
            .query_row(rusqlite::params![tenant.as_str(), normalized], |row| {
                Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?))
            });
        match row {
            Ok(pair) => Ok(Some(pair)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Auto-discovery: the first reply from an unseen WhatsApp business id
    /// that maps to a known phone records the pairing on the contact row.
    pub fn link_whatsapp_business_id(
        &self,
        tenant: &TenantId,
        contact_id: ContactId,
        business_id: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        {
            let conn = self.db.lock().unwrap();
            conn.execute(
                "UPDATE contacts SET whatsapp_id = ?1, updated_at = ?2
                 WHERE id = ?3 AND tenant_id = ?4",
                rusqlite::params![business_id, now, contact_id, tenant.as_str()],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO contact_channel_mappings
                 (tenant_id, contact_id, kind, identifier, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    tenant.as_str(),
                    contact_id,
                    ChannelIdentifierKind::WhatsappId.as_str(),
                    business_id,
                    now
                ],
            )?;
        }
        info!(tenant = %tenant, contact_id, business_id, "linked WhatsApp business id");
        self.invalidate_all();
        Ok(())
    }

    pub fn create_contact(
        &self,
        tenant: &TenantId,
        friendly_name: &str,
        role: ContactRole,
        phone_number: Option<&str>,
        whatsapp_id: Option<&str>,
    ) -> Result<Contact> {
        let now = chrono::Utc::now().to_rfc3339();
        let id = {
            let conn = self.db.lock().unwrap();
            conn.execute(
                "INSERT INTO contacts
                 (tenant_id, friendly_name, role, is_active, phone_number, whatsapp_id,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    tenant.as_str(),
                    friendly_name,
                    role.as_str(),
                    phone_number,
                    whatsapp_id,
                    now
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.invalidate_all();
        Ok(Contact {
            id,
            tenant_id: tenant.as_str().to_string(),
            friendly_name: friendly_name.to_string(),
            role,
            is_active: true,
            phone_number: phone_number.map(|s| s.to_string()),
            whatsapp_id: whatsapp_id.map(|s| s.to_string()),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn record_mapping(
        &self,
        tenant: &TenantId,
        contact_id: ContactId,
        kind: ChannelIdentifierKind,
        identifier: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        {
            let conn = self.db.lock().unwrap();
            conn.execute(
                "INSERT OR IGNORE INTO contact_channel_mappings
                 (tenant_id, contact_id, kind, identifier, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![tenant.as_str(), contact_id, kind.as_str(), identifier, now],
            )?;
        }
        self.invalidate_all();
        Ok(())
    }

    pub fn get(&self, id: ContactId) -> Result<Option<Contact>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, friendly_name, role, is_active, phone_number,
                    whatsapp_id, created_at, updated_at
             FROM contacts WHERE id = ?1",
        )?;
        match stmt.query_row(rusqlite::params![id], row_to_contact) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The agent mapped to this contact for DM routing, if any.
    pub fn agent_for_contact(&self, contact_id: ContactId) -> Result<Option<AgentId>> {
        let conn = self.db.lock().unwrap();
        match conn.query_row(
            "SELECT agent_id FROM contact_agent_mappings WHERE contact_id = ?1",
            rusqlite::params![contact_id],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn map_contact_to_agent(
        &self,
        tenant: &TenantId,
        contact_id: ContactId,
        agent_id: AgentId,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        {
            let conn = self.db.lock().unwrap();
            conn.execute(
                "INSERT OR REPLACE INTO contact_agent_mappings
                 (contact_id, agent_id, tenant_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![contact_id, agent_id, tenant.as_str(), now],
            )?;
        }
        self.invalidate_all();
        Ok(())
    }

    /// Compact contact summary for prompt injection. Lists active contacts
    /// with their strongest identifier; agents are labelled so the model can
    /// route `@name` mentions.
    pub fn format_contacts_for_context(&self, tenant: &TenantId) -> Result<String> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT friendly_name, role, phone_number
             FROM contacts
             WHERE tenant_id = ?1 AND is_active = 1
             ORDER BY role DESC, friendly_name",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut out = String::from("Known contacts:\n");
        let mut any = false;
        for row in rows.filter_map(|r| r.ok()) {
            let (name, role, phone) = row;
            any = true;
            match (role.as_str(), phone) {
                ("agent", _) => out.push_str(&format!("- @{} (agent)\n", name)),
                (_, Some(p)) => out.push_str(&format!("- {} ({})\n", name, p)),
                _ => out.push_str(&format!("- {}\n", name)),
            }
        }
        if !any {
            out.push_str("- (none)\n");
        }
        Ok(out)
    }

    fn agent_contacts(&self, tenant: &TenantId) -> Result<Vec<Contact>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, friendly_name, role, is_active, phone_number,
                    whatsapp_id, created_at, updated_at
             FROM contacts
             WHERE tenant_id = ?1 AND role = 'agent' AND is_active = 1",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], row_to_contact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn query_by_mapping(
        &self,
        conn: &Connection,
        tenant: &TenantId,
        kind: ChannelIdentifierKind,
        identifier: &str,
    ) -> Result<Option<Contact>> {
        let mut stmt = conn.prepare(
            "SELECT c.id, c.tenant_id, c.friendly_name, c.role, c.is_active,
                    c.phone_number, c.whatsapp_id, c.created_at, c.updated_at
             FROM contacts c
             JOIN contact_channel_mappings m ON m.contact_id = c.id
             WHERE m.tenant_id = ?1 AND m.kind = ?2 AND m.identifier = ?3",
        )?;
        match stmt.query_row(
            rusqlite::params![tenant.as_str(), kind.as_str(), identifier],
            row_to_contact,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn query_legacy_columns(
        &self,
        conn: &Connection,
        tenant: &TenantId,
        kind: ChannelIdentifierKind,
        identifier: &str,
    ) -> Result<Option<Contact>> {
        let column = match kind {
            ChannelIdentifierKind::Phone => "phone_number",
            ChannelIdentifierKind::WhatsappId => "whatsapp_id",
            _ => return Ok(None),
        };
        let sql = format!(
            "SELECT id, tenant_id, friendly_name, role, is_active, phone_number,
                    whatsapp_id, created_at, updated_at
             FROM contacts
             WHERE tenant_id = ?1 AND {col} = ?2",
            col = column
        );
        let mut stmt = conn.prepare(&sql)?;
        match stmt.query_row(rusqlite::params![tenant.as_str(), identifier], row_to_contact) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ── cache helpers ─────────────────────────────────────────────────────

    fn cache_lookup(&self, key: &(String, String, String)) -> Option<ContactId> {
        let cache = self.cache.lock().unwrap();
        let (id, at) = cache.get(key)?;
        if at.elapsed() < CACHE_TTL {
            Some(*id)
        } else {
            None
        }
    }

    fn cache_insert(&self, key: (String, String, String), id: ContactId) {
        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= CACHE_CAP {
            // Evict the oldest entry.
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }
        cache.insert(key, (id, Instant::now()));
    }

    /// Writes invalidate everything: a relink can change arbitrarily many
    /// cached keys and the cache is cheap to rebuild.
    pub fn invalidate_all(&self) {
        self.cache.lock().unwrap().clear();
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let role_str: String = row.get(3)?;
    Ok(Contact {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        friendly_name: row.get(2)?,
        role: role_str.parse().unwrap_or(ContactRole::User),
        is_active: row.get::<_, i64>(4)? != 0,
        phone_number: row.get(5)?,
        whatsapp_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> ContactDirectory {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        ContactDirectory::new(Arc::new(Mutex::new(conn)))
    }

    fn tenant() -> TenantId {
        TenantId::default_tenant()
    }

    #[test]
    fn resolves_via_mapping_before_legacy_columns() {
        let dir = directory();
        let t = tenant();
        let alice = dir
            .create_contact(&t, "Alice", ContactRole::User, Some("5511999990000"), None)
            .unwrap();
        dir.record_mapping(&t, alice.id, ChannelIdentifierKind::Phone, "5511999990000")
            .unwrap();

        let hit = dir
            .resolve(&t, ChannelIdentifierKind::Phone, "5511999990000")
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, alice.id);
    }

    #[test]
    fn resolve_sender_matches_jid_forms() {
        let dir = directory();
        let t = tenant();
        let alice = dir
            .create_contact(&t, "Alice", ContactRole::User, Some("5511999990000"), None)
            .unwrap();

        let hit = dir
            .resolve_sender(&t, "5511999990000@s.whatsapp.net")
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, alice.id);
    }

    #[test]
    fn tenant_isolation_on_resolution() {
        let dir = directory();
        let t = tenant();
        dir.create_contact(&t, "Alice", ContactRole::User, Some("5511999990000"), None)
            .unwrap();

        let other = TenantId::new("other");
        assert!(dir
            .resolve_sender(&other, "5511999990000")
            .unwrap()
            .is_none());
    }

    #[test]
    fn ensure_group_sender_creates_anonymous_contact() {
        let dir = directory();
        let t = tenant();
        let c = dir
            .ensure_group_sender(&t, "5511888880000@s.whatsapp.net", None)
            .unwrap();
        assert_eq!(c.friendly_name, "whatsapp:5511888880000");

        // Second resolution hits the mapping, not a second insert.
        let again = dir
            .ensure_group_sender(&t, "5511888880000", None)
            .unwrap();
        assert_eq!(again.id, c.id);
    }

    #[test]
    fn mentioned_agent_is_case_insensitive() {
        let dir = directory();
        let t = tenant();
        let bot = dir
            .create_contact(&t, "agendador", ContactRole::Agent, None, None)
            .unwrap();

        let hit = dir
            .mentioned_agent(&t, "@Agendador me lembre em 5 minutos")
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, bot.id);

        assert!(dir.mentioned_agent(&t, "random chatter").unwrap().is_none());
    }

    #[test]
    fn business_id_link_enables_cross_lookup() {
        let dir = directory();
        let t = tenant();
        let c = dir
            .create_contact(&t, "Courier", ContactRole::User, Some("5511777770000"), None)
            .unwrap();
        dir.link_whatsapp_business_id(&t, c.id, "193853382488108")
            .unwrap();

        let pair = dir
            .paired_identifiers(&t, "193853382488108")
            .unwrap()
            .unwrap();
        assert_eq!(pair.0.as_deref(), Some("5511777770000"));
    }
}
