//! This module is responsible for reading, writing and managing the SQLite ledger.
//!
//! Writes to a group's ledger are serialized by a per-group lock and each one runs in a single
//! transaction, so a write either lands completely or not at all.

mod migrations;

use crate::model::{
    is_settlement_category, normalize_email, normalize_phone, Amount, Group, LedgerEntry, Member,
    MemberId, NewEntry, Reference, Roster, Split, SETTLEMENT_CATEGORY,
};
use crate::{utils, Result};
use anyhow::{bail, ensure, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Handle to the SQLite ledger.
#[derive(Debug, Clone)]
pub(crate) struct Db {
    pool: SqlitePool,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// What happened to a ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReceipt {
    /// The ID of the entry that holds the write.
    pub entry_id: String,
    /// The idempotency key the entry was stored under, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// False when an entry with the same key already existed and nothing was written.
    pub written: bool,
}

/// What a shadow-to-account link changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    /// The groups that had a matching shadow member.
    pub groups: Vec<String>,
    /// Shadow members renamed to the account ID.
    pub relinked: u64,
    /// Shadow members dropped because the account was already in the group.
    pub merged: u64,
    /// Entries whose payer was rewritten.
    pub entries: u64,
    /// Splits whose member was rewritten.
    pub splits: u64,
}

impl LinkReport {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// The outcome of `Db::delete_entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deletion {
    Deleted,
    AlreadyDeleted,
    /// The entry is a settlement. Nothing was changed.
    Settlement,
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    member_id: String,
    name: String,
    email: Option<String>,
    phone: Option<String>,
}

impl TryFrom<MemberRow> for Member {
    type Error = crate::Error;

    fn try_from(row: MemberRow) -> Result<Self> {
        Ok(Member {
            id: parse_id(&row.member_id)?,
            name: row.name,
            email: row.email,
            phone: row.phone,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    id: String,
    description: Option<String>,
    amount: String,
    category: String,
    payer_id: Option<String>,
    payer_name: Option<String>,
    deleted: bool,
    created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SplitRow {
    entry_id: String,
    member_id: Option<String>,
    member_name: Option<String>,
    amount: String,
}

fn parse_id(s: &str) -> Result<MemberId> {
    MemberId::from_str(s).with_context(|| format!("Invalid member id '{s}' in the database"))
}

fn parse_amount(s: &str) -> Result<Amount> {
    Amount::from_str(s).with_context(|| format!("Invalid amount '{s}' in the database"))
}

/// Rebuilds a reference from its stored ID and denormalized name.
fn stored_reference(id: Option<&str>, name: Option<&str>) -> Result<Option<Reference>> {
    let Some(id) = id else {
        return Ok(None);
    };
    let id = parse_id(id)?;
    Ok(Some(match name {
        Some(name) => Reference::Populated {
            id,
            name: name.to_string(),
        },
        None => Reference::Id(id),
    }))
}

fn stored_amount(amount: Amount) -> String {
    amount.round2().value().to_string()
}

impl Db {
    /// - Creates a new SQLite file at `path`, failing if one exists
    /// - Initializes the database schema
    pub(crate) async fn init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ensure!(
            !path.exists(),
            "A database already exists at {}",
            path.display()
        );
        let pool = connect(path, true).await?;
        migrations::bootstrap(&pool).await?;
        migrations::run(&pool, 0, migrations::CURRENT_VERSION).await?;
        debug!("Created the ledger at {}", path.display());
        Ok(Self::new(pool))
    }

    /// - Validates that there is a SQLite file at `path`
    /// - Updates the database schema with migrations if it is out of date
    pub(crate) async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ensure!(
            path.is_file(),
            "The database is missing '{}'",
            path.display()
        );
        let pool = connect(path, false).await?;
        let version = migrations::version(&pool).await?;
        if version > migrations::CURRENT_VERSION {
            bail!(
                "The database schema version {version} is newer than this program supports ({})",
                migrations::CURRENT_VERSION
            );
        }
        migrations::run(&pool, version, migrations::CURRENT_VERSION).await?;
        Ok(Self::new(pool))
    }

    fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Waits for exclusive write access to one group's ledger.
    async fn lock_group(&self, group: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .await
            .entry(group.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin a transaction")
    }

    pub(crate) async fn create_group(&self, id: &str, name: &str) -> Result<()> {
        let _guard = self.lock_group(id).await;
        let mut tx = self.begin().await?;
        if group_exists(&mut tx, id).await? {
            bail!("The group '{id}' already exists");
        }
        sqlx::query("INSERT INTO expense_groups (id, name, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .context("Failed to insert the group")?;
        tx.commit().await.context("Failed to commit the group")?;
        debug!("Created group {id}");
        Ok(())
    }

    /// Adds a member to the end of a group's member list. Email and phone are stored normalized.
    pub(crate) async fn add_member(&self, group: &str, member: &Member) -> Result<()> {
        let _guard = self.lock_group(group).await;
        let mut tx = self.begin().await?;
        require_group(&mut tx, group).await?;

        let roster = Roster::new(members(&mut tx, group).await?);
        if let Some(existing) = roster.get(&member.id) {
            bail!(
                "{} is already a member of '{group}' as '{}'",
                member.id,
                existing.name
            );
        }

        sqlx::query(
            "INSERT INTO members (group_id, member_id, name, email, phone, position)
             VALUES (?, ?, ?, ?, ?,
                     (SELECT COALESCE(MAX(position), -1) + 1 FROM members WHERE group_id = ?))",
        )
        .bind(group)
        .bind(member.id.to_string())
        .bind(member.name.trim())
        .bind(member.email.as_deref().map(normalize_email))
        .bind(member.phone.as_deref().map(normalize_phone))
        .bind(group)
        .execute(&mut *tx)
        .await
        .context("Failed to insert the member")?;
        tx.commit().await.context("Failed to commit the member")?;
        debug!("Added {} to {group}", member.id);
        Ok(())
    }

    /// Loads a group with its members in the order they were added and its whole ledger,
    /// deleted entries included.
    pub(crate) async fn load_group(&self, group: &str) -> Result<Group> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire a connection")?;

        let name: Option<(String,)> = sqlx::query_as("SELECT name FROM expense_groups WHERE id = ?")
            .bind(group)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to query the group")?;
        let Some((name,)) = name else {
            bail!("There is no group '{group}'");
        };

        let members = members(&mut conn, group).await?;
        let entries = entries(&mut conn, group).await?;
        debug!(
            "Loaded group {group} with {} members and {} entries",
            members.len(),
            entries.len()
        );
        Ok(Group {
            id: Some(group.to_string()),
            name,
            members,
            entries,
        })
    }

    /// Validates `entry` against the group's current members and appends it to the ledger.
    ///
    /// When `key` is given and an entry with that key exists, nothing is written.
    pub(crate) async fn insert_entry(
        &self,
        group: &str,
        entry: NewEntry,
        key: Option<&str>,
    ) -> Result<EntryReceipt> {
        let _guard = self.lock_group(group).await;
        let mut tx = self.begin().await?;
        require_group(&mut tx, group).await?;

        if let Some(receipt) = existing_key(&mut tx, group, key).await? {
            return Ok(receipt);
        }
        let entry_id = insert_validated(&mut tx, group, entry, key).await?;
        tx.commit().await.context("Failed to commit the entry")?;
        Ok(EntryReceipt {
            entry_id,
            key: key.map(str::to_string),
            written: true,
        })
    }

    /// Appends the settlement entry for `from` paying `to`.
    ///
    /// Without an explicit `key`, the key is derived from the payment and the number of expenses
    /// in the ledger, so accepting the same suggestion twice writes one entry. A new expense makes
    /// the same payment distinct again.
    pub(crate) async fn accept_settlement(
        &self,
        group: &str,
        from: &MemberId,
        to: &MemberId,
        amount: Amount,
        key: Option<&str>,
    ) -> Result<EntryReceipt> {
        let _guard = self.lock_group(group).await;
        let mut tx = self.begin().await?;
        require_group(&mut tx, group).await?;

        let key = match key {
            Some(key) => key.to_string(),
            None => {
                let expenses = expense_count(&mut tx, group).await?;
                settlement_key(group, from, to, amount, expenses)
            }
        };
        if let Some(receipt) = existing_key(&mut tx, group, Some(&key)).await? {
            debug!("Settlement {key} was already accepted");
            return Ok(receipt);
        }

        ensure!(from != to, "A member cannot settle with themselves");
        let entry = NewEntry {
            description: Some("Settlement".to_string()),
            amount,
            category: SETTLEMENT_CATEGORY.to_string(),
            payer: from.clone(),
            splits: vec![(to.clone(), amount)],
        };
        let entry_id = insert_validated(&mut tx, group, entry, Some(&key)).await?;
        tx.commit()
            .await
            .context("Failed to commit the settlement")?;
        Ok(EntryReceipt {
            entry_id,
            key: Some(key),
            written: true,
        })
    }

    /// Soft-deletes an expense. Settlement entries record money that changed hands and are never
    /// deleted.
    pub(crate) async fn delete_entry(&self, group: &str, entry_id: &str) -> Result<Deletion> {
        let _guard = self.lock_group(group).await;
        let mut tx = self.begin().await?;

        let row: Option<(bool, String)> =
            sqlx::query_as("SELECT deleted, category FROM entries WHERE group_id = ? AND id = ?")
                .bind(group)
                .bind(entry_id)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to query the entry")?;
        match row {
            None => bail!("There is no entry '{entry_id}' in group '{group}'"),
            Some((_, category)) if is_settlement_category(&category) => {
                return Ok(Deletion::Settlement)
            }
            Some((true, _)) => return Ok(Deletion::AlreadyDeleted),
            Some((false, _)) => {}
        }

        sqlx::query("UPDATE entries SET deleted = 1 WHERE id = ?")
            .bind(entry_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete the entry")?;
        tx.commit().await.context("Failed to commit the delete")?;
        debug!("Deleted entry {entry_id} in {group}");
        Ok(Deletion::Deleted)
    }

    /// Rewrites every shadow member matching `email` or `phone` to `account`, in every group,
    /// together with the payer and split references that point at it.
    ///
    /// Runs in one transaction. Running it again finds no shadow members and changes nothing.
    pub(crate) async fn link_account(
        &self,
        account: &MemberId,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<LinkReport> {
        ensure!(account.is_account(), "{account} is not an account id");
        let email = email.map(normalize_email).filter(|s| !s.is_empty());
        let phone = phone.map(normalize_phone).filter(|s| !s.is_empty());
        ensure!(
            email.is_some() || phone.is_some(),
            "An email or a phone number is needed to find shadow members"
        );

        // Hold the lock of every affected group, in a stable order
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire a connection")?;
        let mut groups: Vec<String> = shadow_matches(&mut conn, &email, &phone)
            .await?
            .into_iter()
            .map(|(group, _)| group)
            .collect();
        groups.sort();
        groups.dedup();
        drop(conn);
        let mut guards = Vec::with_capacity(groups.len());
        for group in &groups {
            guards.push(self.lock_group(group).await);
        }

        let mut tx = self.begin().await?;
        let mut report = LinkReport::default();
        let account_str = account.to_string();
        for (group, shadow) in shadow_matches(&mut *tx, &email, &phone).await? {
            let roster = Roster::new(members(&mut tx, &group).await?);
            if roster.contains(account) {
                sqlx::query("DELETE FROM members WHERE group_id = ? AND member_id = ?")
                    .bind(&group)
                    .bind(&shadow)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to drop the shadow member")?;
                report.merged += 1;
            } else {
                sqlx::query("UPDATE members SET member_id = ? WHERE group_id = ? AND member_id = ?")
                    .bind(&account_str)
                    .bind(&group)
                    .bind(&shadow)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to relink the shadow member")?;
                report.relinked += 1;
            }

            report.entries += sqlx::query(
                "UPDATE entries SET payer_id = ? WHERE group_id = ? AND payer_id = ?",
            )
            .bind(&account_str)
            .bind(&group)
            .bind(&shadow)
            .execute(&mut *tx)
            .await
            .context("Failed to relink payers")?
            .rows_affected();

            report.splits += sqlx::query(
                "UPDATE splits SET member_id = ?
                 WHERE member_id = ? AND entry_id IN (SELECT id FROM entries WHERE group_id = ?)",
            )
            .bind(&account_str)
            .bind(&shadow)
            .bind(&group)
            .execute(&mut *tx)
            .await
            .context("Failed to relink splits")?
            .rows_affected();

            if !report.groups.contains(&group) {
                report.groups.push(group);
            }
        }
        tx.commit().await.context("Failed to commit the link")?;
        drop(guards);

        debug!(
            "Linked {account}: {} relinked, {} merged, {} entries, {} splits",
            report.relinked, report.merged, report.entries, report.splits
        );
        Ok(report)
    }
}

async fn connect(path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .foreign_keys(true)
        // Keep the whole database in one file so backups are a plain copy
        .journal_mode(SqliteJournalMode::Delete);
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("Unable to open SQLite database {}", path.display()))
}

async fn group_exists(conn: &mut SqliteConnection, group: &str) -> Result<bool> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM expense_groups WHERE id = ?")
        .bind(group)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to query the group")?;
    Ok(row.0 > 0)
}

async fn require_group(conn: &mut SqliteConnection, group: &str) -> Result<()> {
    ensure!(group_exists(conn, group).await?, "There is no group '{group}'");
    Ok(())
}

async fn members(conn: &mut SqliteConnection, group: &str) -> Result<Vec<Member>> {
    let rows: Vec<MemberRow> = sqlx::query_as(
        "SELECT member_id, name, email, phone FROM members WHERE group_id = ? ORDER BY position",
    )
    .bind(group)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to query members")?;
    rows.into_iter().map(Member::try_from).collect()
}

async fn entries(conn: &mut SqliteConnection, group: &str) -> Result<Vec<LedgerEntry>> {
    let rows: Vec<EntryRow> = sqlx::query_as(
        "SELECT id, description, amount, category, payer_id, payer_name, deleted, created_at
         FROM entries WHERE group_id = ? ORDER BY seq",
    )
    .bind(group)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to query entries")?;

    let split_rows: Vec<SplitRow> = sqlx::query_as(
        "SELECT s.entry_id, s.member_id, s.member_name, s.amount
         FROM splits s JOIN entries e ON e.id = s.entry_id
         WHERE e.group_id = ? ORDER BY e.seq, s.position",
    )
    .bind(group)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to query splits")?;

    let mut splits: HashMap<String, Vec<Split>> = HashMap::new();
    for row in split_rows {
        let split = Split {
            member: stored_reference(row.member_id.as_deref(), row.member_name.as_deref())?,
            member_name_fallback: row.member_name,
            amount: parse_amount(&row.amount)?,
        };
        splits.entry(row.entry_id).or_default().push(split);
    }

    rows.into_iter()
        .map(|row| {
            Ok(LedgerEntry {
                payer: stored_reference(row.payer_id.as_deref(), row.payer_name.as_deref())?,
                payer_name_fallback: row.payer_name,
                amount: parse_amount(&row.amount)?,
                splits: splits.remove(&row.id).unwrap_or_default(),
                description: row.description,
                category: row.category,
                deleted: row.deleted,
                created_at: DateTime::parse_from_rfc3339(&row.created_at)
                    .ok()
                    .map(|t| t.with_timezone(&Utc)),
                id: Some(row.id),
            })
        })
        .collect()
}

async fn existing_key(
    conn: &mut SqliteConnection,
    group: &str,
    key: Option<&str>,
) -> Result<Option<EntryReceipt>> {
    let Some(key) = key else {
        return Ok(None);
    };
    let row: Option<(String,)> =
        sqlx::query_as("SELECT id FROM entries WHERE group_id = ? AND idempotency_key = ?")
            .bind(group)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to look up the idempotency key")?;
    Ok(row.map(|(entry_id,)| EntryReceipt {
        entry_id,
        key: Some(key.to_string()),
        written: false,
    }))
}

async fn expense_count(conn: &mut SqliteConnection, group: &str) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM entries WHERE group_id = ? AND lower(trim(category)) <> lower(?)",
    )
    .bind(group)
    .bind(SETTLEMENT_CATEGORY)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to count expenses")?;
    Ok(row.0)
}

fn settlement_key(
    group: &str,
    from: &MemberId,
    to: &MemberId,
    amount: Amount,
    expenses: i64,
) -> String {
    let material = format!(
        "{group}|{from}|{to}|{}|{expenses}",
        amount.round2().value().normalize()
    );
    let digest = Sha256::digest(material.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("settle-{hex}")
}

/// Validates `entry` against the members as they are inside this transaction and inserts it.
async fn insert_validated(
    conn: &mut SqliteConnection,
    group: &str,
    entry: NewEntry,
    key: Option<&str>,
) -> Result<String> {
    let roster = Roster::new(members(conn, group).await?);
    entry.validate(&roster)?;
    let entry = entry.into_ledger_entry(&roster);

    let entry_id = utils::generate_id("ent");
    let payer = entry.payer();
    sqlx::query(
        "INSERT INTO entries
            (id, group_id, seq, description, amount, category, payer_id, payer_name,
             deleted, idempotency_key, created_at)
         VALUES (?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM entries WHERE group_id = ?),
                 ?, ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(&entry_id)
    .bind(group)
    .bind(group)
    .bind(entry.description.as_deref())
    .bind(stored_amount(entry.amount))
    .bind(entry.category.trim())
    .bind(payer.id().map(|id| id.to_string()))
    .bind(payer.name())
    .bind(key)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await
    .context("Failed to insert the entry")?;

    for (position, split) in entry.splits.iter().enumerate() {
        let member = split.reference();
        sqlx::query(
            "INSERT INTO splits (entry_id, position, member_id, member_name, amount)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry_id)
        .bind(position as i64)
        .bind(member.id().map(|id| id.to_string()))
        .bind(member.name())
        .bind(stored_amount(split.amount))
        .execute(&mut *conn)
        .await
        .context("Failed to insert a split")?;
    }

    debug!("Inserted entry {entry_id} into {group}");
    Ok(entry_id)
}

/// Finds `(group, shadow member id)` pairs whose contact info matches.
async fn shadow_matches(
    conn: &mut SqliteConnection,
    email: &Option<String>,
    phone: &Option<String>,
) -> Result<Vec<(String, String)>> {
    sqlx::query_as(
        "SELECT group_id, member_id FROM members
         WHERE member_id LIKE 'shadow:%'
           AND ((?1 IS NOT NULL AND email = ?1) OR (?2 IS NOT NULL AND phone = ?2))
         ORDER BY group_id, position",
    )
    .bind(email.as_deref())
    .bind(phone.as_deref())
    .fetch_all(&mut *conn)
    .await
    .context("Failed to query shadow members")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::split_equally;
    use crate::test::TestEnv;

    fn amt(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    fn expense(payer: &MemberId, amount: &str, members: &[MemberId]) -> NewEntry {
        NewEntry {
            description: Some("Dinner".into()),
            amount: amt(amount),
            category: "Food".into(),
            payer: payer.clone(),
            splits: split_equally(amt(amount), members),
        }
    }

    #[tokio::test]
    async fn test_group_round_trip() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let [ana, ben, cleo] = env.trip().await;

        let group = db.load_group(TestEnv::TRIP).await.unwrap();
        assert_eq!(group.name, "Lisbon");
        let ids: Vec<_> = group.members.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, [ana.clone(), ben.clone(), cleo.clone()]);
        assert_eq!(group.members[1].phone.as_deref(), Some("+15550100"));

        assert_eq!(group.entries.len(), 2);
        let first = &group.entries[0];
        assert_eq!(first.amount, amt("90"));
        assert_eq!(first.payer().name(), Some("Ana"));
        assert_eq!(first.splits.len(), 3);
        assert!(first.created_at.is_some());
        assert_eq!(group.balances().get(&ana), amt("60"));
    }

    #[tokio::test]
    async fn test_missing_group() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        assert!(db.load_group("nope").await.is_err());
        let entry = expense(&MemberId::account("u1"), "10", &[MemberId::account("u1")]);
        assert!(db.insert_entry("nope", entry, None).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_group_and_member() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        env.trip().await;
        assert!(db.create_group(TestEnv::TRIP, "Again").await.is_err());
        let dup = Member::with_account("u1", "Someone");
        let err = db.add_member(TestEnv::TRIP, &dup).await.unwrap_err();
        assert!(err.to_string().contains("already a member"), "{err}");
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_entry() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let [ana, _, _] = env.trip().await;
        let outsider = MemberId::account("zed");
        let entry = expense(&ana, "10", &[outsider]);
        assert!(db.insert_entry(TestEnv::TRIP, entry, None).await.is_err());
        let group = db.load_group(TestEnv::TRIP).await.unwrap();
        assert_eq!(group.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_with_key_is_idempotent() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let [ana, ben, _] = env.trip().await;

        let entry = expense(&ana, "10", &[ana.clone(), ben.clone()]);
        let first = db
            .insert_entry(TestEnv::TRIP, entry.clone(), Some("k1"))
            .await
            .unwrap();
        let second = db
            .insert_entry(TestEnv::TRIP, entry, Some("k1"))
            .await
            .unwrap();
        assert!(first.written);
        assert!(!second.written);
        assert_eq!(first.entry_id, second.entry_id);
        assert_eq!(db.load_group(TestEnv::TRIP).await.unwrap().entries.len(), 3);
    }

    #[tokio::test]
    async fn test_same_key_in_two_groups() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let [ana, _, cleo] = env.trip().await;
        db.create_group("flat", "Flat").await.unwrap();
        let (x, y) = (Member::with_account("x1", "Xia"), Member::with_account("y1", "Yan"));
        db.add_member("flat", &x).await.unwrap();
        db.add_member("flat", &y).await.unwrap();

        let trip = db
            .accept_settlement(TestEnv::TRIP, &cleo, &ana, amt("10"), Some("bank-ref-1"))
            .await
            .unwrap();
        let flat = db
            .accept_settlement("flat", &y.id, &x.id, amt("7"), Some("bank-ref-1"))
            .await
            .unwrap();
        assert!(trip.written);
        assert!(flat.written);
        assert_ne!(trip.entry_id, flat.entry_id);

        let group = db.load_group("flat").await.unwrap();
        assert_eq!(group.entries.len(), 1);
        assert_eq!(group.balances().get(&y.id), amt("7"));
    }

    #[tokio::test]
    async fn test_accept_settlement_twice_writes_once() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let [ana, ben, _] = env.trip().await;

        let before = db.load_group(TestEnv::TRIP).await.unwrap().balances();
        let owed = -before.get(&ben);

        let a = db
            .accept_settlement(TestEnv::TRIP, &ben, &ana, owed, None)
            .await
            .unwrap();
        let b = db
            .accept_settlement(TestEnv::TRIP, &ben, &ana, owed, None)
            .await
            .unwrap();
        assert!(a.written);
        assert!(!b.written);
        assert_eq!(a.key, b.key);

        let after = db.load_group(TestEnv::TRIP).await.unwrap();
        assert_eq!(after.entries.len(), 3);
        assert!(after.entries[2].is_settlement());
        assert_eq!(after.balances().get(&ben), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_accept_settlement_after_new_expense_is_new() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let [ana, ben, _] = env.trip().await;

        let a = db
            .accept_settlement(TestEnv::TRIP, &ben, &ana, amt("5"), None)
            .await
            .unwrap();
        db.insert_entry(TestEnv::TRIP, expense(&ana, "4", &[ben.clone()]), None)
            .await
            .unwrap();
        let b = db
            .accept_settlement(TestEnv::TRIP, &ben, &ana, amt("5"), None)
            .await
            .unwrap();
        assert!(b.written);
        assert_ne!(a.key, b.key);
    }

    #[tokio::test]
    async fn test_concurrent_settlements_write_once() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let [ana, ben, _] = env.trip().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (db, ana, ben) = (db.clone(), ana.clone(), ben.clone());
            handles.push(tokio::spawn(async move {
                db.accept_settlement(TestEnv::TRIP, &ben, &ana, amt("12.5"), None)
                    .await
                    .unwrap()
            }));
        }
        let mut written = 0;
        for handle in handles {
            if handle.await.unwrap().written {
                written += 1;
            }
        }
        assert_eq!(written, 1);
        assert_eq!(db.load_group(TestEnv::TRIP).await.unwrap().entries.len(), 3);
    }

    #[tokio::test]
    async fn test_settle_with_self_fails() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let [ana, _, _] = env.trip().await;
        assert!(db
            .accept_settlement(TestEnv::TRIP, &ana, &ana, amt("1"), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        env.trip().await;
        let group = db.load_group(TestEnv::TRIP).await.unwrap();
        let id = group.entries[0].id.clone().unwrap();

        assert_eq!(
            db.delete_entry(TestEnv::TRIP, &id).await.unwrap(),
            Deletion::Deleted
        );
        assert_eq!(
            db.delete_entry(TestEnv::TRIP, &id).await.unwrap(),
            Deletion::AlreadyDeleted
        );
        assert!(db.delete_entry(TestEnv::TRIP, "ent-missing").await.is_err());

        let group = db.load_group(TestEnv::TRIP).await.unwrap();
        assert!(group.entries[0].deleted);
        assert_eq!(group.live_entries().count(), 1);
    }

    #[tokio::test]
    async fn test_delete_settlement_is_refused() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let [ana, ben, _] = env.trip().await;
        let receipt = db
            .accept_settlement(TestEnv::TRIP, &ben, &ana, amt("15"), None)
            .await
            .unwrap();
        assert_eq!(
            db.load_group(TestEnv::TRIP).await.unwrap().balances().get(&ben),
            Amount::ZERO
        );

        assert_eq!(
            db.delete_entry(TestEnv::TRIP, &receipt.entry_id).await.unwrap(),
            Deletion::Settlement
        );
        let group = db.load_group(TestEnv::TRIP).await.unwrap();
        assert!(group.entries.iter().all(|e| !e.deleted));
        assert_eq!(group.balances().get(&ben), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_link_account() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let [ana, ben, cleo] = env.trip().await;
        let before = db.load_group(TestEnv::TRIP).await.unwrap().balances();

        let account = MemberId::account("u2");
        let report = db
            .link_account(&account, None, Some("+1 555 0100"))
            .await
            .unwrap();
        assert_eq!(report.groups, [TestEnv::TRIP]);
        assert_eq!(report.relinked, 1);
        assert_eq!(report.merged, 0);
        assert_eq!(report.entries, 1);
        assert_eq!(report.splits, 2);

        let group = db.load_group(TestEnv::TRIP).await.unwrap();
        assert_eq!(group.members[1].id, account);
        let after = group.balances();
        assert_eq!(after.get(&account), before.get(&ben));
        assert_eq!(after.get(&ana), before.get(&ana));
        assert_eq!(after.get(&cleo), before.get(&cleo));
        assert!(!after.contains(&ben));

        let again = db
            .link_account(&account, None, Some("+15550100"))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_link_merges_when_account_already_present() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let [ana, ben, _] = env.trip().await;
        let before = db.load_group(TestEnv::TRIP).await.unwrap().balances();

        // Ben's shadow turns out to be Ana
        let report = db
            .link_account(&ana, None, Some("+15550100"))
            .await
            .unwrap();
        assert_eq!(report.merged, 1);

        let group = db.load_group(TestEnv::TRIP).await.unwrap();
        assert_eq!(group.members.len(), 2);
        let after = group.balances();
        assert_eq!(after.get(&ana), before.get(&ana) + before.get(&ben));
        assert_eq!(after.total(), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_link_requires_contact() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        assert!(db
            .link_account(&MemberId::account("u9"), None, None)
            .await
            .is_err());
        assert!(db
            .link_account(&MemberId::shadow_from_name("x"), Some("a@b.c"), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reload_runs_no_migrations() {
        let env = TestEnv::new().await;
        let path = env.config().sqlite_path().to_path_buf();
        let db = Db::load(&path).await.unwrap();
        assert_eq!(
            migrations::version(&db.pool).await.unwrap(),
            migrations::CURRENT_VERSION
        );
        assert!(Db::init(&path).await.is_err());
    }
}
