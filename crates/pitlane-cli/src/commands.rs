//! Command handlers for the `pitlane` binary.
//!
//! `App` owns the configuration and the saved session; each command opens
//! the configured backend, runs one engine operation and prints the result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use pitlane_core::auth::{IdentityClient, Session};
use pitlane_core::capacity;
use pitlane_core::format::{describe, format_timestamp, relative_time, truncate};
use pitlane_core::models::{
    ActorId, Group, GroupId, HistoryRecord, Member, MemberId, Resource, ResourceId,
};
use pitlane_core::store::firestore::FirestoreClient;
use pitlane_core::store::{FirestoreStore, JsonFileStore, Snapshot};
use pitlane_core::{
    AssignmentEngine, Backend, Config, EntityStore, HistoryLedger, HistoryStore, Outcome,
};

use crate::cli::{Cli, Command, InstructorCommand};

/// Longest notes excerpt shown in the roster.
const NOTES_DISPLAY_LEN: usize = 40;

/// History entries older than this show a date instead of an age.
const RELATIVE_TIME_MAX_DAYS: i64 = 7;

pub struct App {
    config: Config,
    data_dir: PathBuf,
    session: Session,
    actor: Option<String>,
    source: Option<String>,
    auth_emulator: Option<String>,
}

impl App {
    pub fn new(config: Config, data_dir: PathBuf) -> Self {
        let mut session = Session::new(data_dir.clone());
        if let Err(e) = session.load() {
            warn!(error = %e, "Ignoring unreadable session file");
        }
        debug!(has_session = session.data.is_some(), "Session loaded");

        Self {
            config,
            data_dir,
            session,
            actor: None,
            source: None,
            auth_emulator: None,
        }
    }

    pub async fn run(mut self, cli: Cli) -> Result<()> {
        self.actor = cli.actor;
        self.source = cli.source;
        self.auth_emulator = cli.auth_emulator;

        match cli.command {
            Command::Login { email } => self.login(email).await,
            Command::Logout => self.logout(),
            Command::Seed { file } => self.seed(&file).await,
            Command::Roster => self.roster().await,
            Command::Assign {
                member,
                resource,
                reason,
            } => {
                let (engine, actor) = self.engine().await?;
                let outcome = engine
                    .assign(
                        &MemberId::new(member),
                        &ResourceId::new(resource),
                        &actor,
                        reason.reason.as_deref(),
                    )
                    .await?;
                print_outcome(&outcome);
                Ok(())
            }
            Command::Unassign { member, reason } => {
                let (engine, actor) = self.engine().await?;
                let outcome = engine
                    .unassign(&MemberId::new(member), &actor, reason.reason.as_deref())
                    .await?;
                print_outcome(&outcome);
                Ok(())
            }
            Command::Swap {
                member,
                resource,
                reason,
            } => {
                let (engine, actor) = self.engine().await?;
                let outcome = engine
                    .swap(
                        &MemberId::new(member),
                        &ResourceId::new(resource),
                        &actor,
                        reason.reason.as_deref(),
                    )
                    .await?;
                print_outcome(&outcome);
                Ok(())
            }
            Command::Move {
                member,
                group,
                none: _,
                reason,
            } => {
                let (engine, actor) = self.engine().await?;
                let group = group.map(GroupId::new);
                let outcome = engine
                    .change_group(
                        &MemberId::new(member),
                        group.as_ref(),
                        &actor,
                        reason.reason.as_deref(),
                    )
                    .await?;
                print_outcome(&outcome);
                Ok(())
            }
            Command::Release { member, reason } => {
                let (engine, actor) = self.engine().await?;
                let records = engine
                    .release_member(&MemberId::new(member), &actor, reason.reason.as_deref())
                    .await?;
                if records.is_empty() {
                    println!("No change");
                }
                for record in &records {
                    println!("{}", describe(record));
                }
                Ok(())
            }
            Command::Instructor { instructor_cmd } => self.instructor(instructor_cmd).await,
            Command::History {
                member,
                resource,
                group,
                limit,
            } => {
                let limit = limit.unwrap_or(self.config.history_limit);
                let (engine, _) = self.engine_for_reading().await?;
                let ledger = engine.ledger();
                let records = if let Some(member) = member {
                    ledger.query_by_member(&MemberId::new(member), limit).await?
                } else if let Some(resource) = resource {
                    ledger.query_by_resource(&ResourceId::new(resource), limit).await?
                } else if let Some(group) = group {
                    ledger.query_by_group(&GroupId::new(group), limit).await?
                } else {
                    ledger.query_recent(limit).await?
                };
                for line in history_lines(&records) {
                    println!("{}", line);
                }
                Ok(())
            }
            Command::Check => {
                let (engine, _) = self.engine_for_reading().await?;
                let violations = engine.audit().await?;
                if violations.is_empty() {
                    println!("No problems found");
                    return Ok(());
                }
                for violation in &violations {
                    println!("{}", violation);
                }
                bail!("{} problem(s) found", violations.len())
            }
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    fn identity_client(&self) -> Result<IdentityClient> {
        let api_key = self
            .config
            .firebase_api_key
            .clone()
            .context("No Firebase API key. Set PITLANE_FIREBASE_API_KEY")?;
        let client = IdentityClient::new(api_key)?;
        Ok(match self.auth_emulator {
            Some(ref host) => client.with_emulator(host),
            None => client,
        })
    }

    async fn login(&mut self, email: Option<String>) -> Result<()> {
        let email = match email.or_else(|| self.config.last_email.clone()) {
            Some(email) => email,
            None => bail!("Email required: pitlane login <email>"),
        };
        let password = match std::env::var("PITLANE_PASSWORD") {
            Ok(password) if !password.is_empty() => password,
            _ => prompt_password()?,
        };

        println!("Signing in as {}...", email);
        let session_data = self.identity_client()?.sign_in(&email, &password).await?;

        // Re-read from disk so environment overrides are not persisted.
        let mut stored = Config::load()?;
        stored.last_email = Some(email);
        stored.save()?;

        let minutes = session_data.minutes_until_expiry();
        self.session.update(session_data);
        self.session.save()?;
        info!("Signed in");
        println!("Signed in (session valid for {} minutes)", minutes);
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        self.session.clear()?;
        println!("Signed out");
        Ok(())
    }

    /// Bearer token for the hosted backend, refreshed when close to expiry.
    async fn token(&mut self) -> Result<String> {
        let Some(data) = self.session.data.clone() else {
            bail!("Not signed in. Run `pitlane login <email>` first");
        };
        if data.needs_refresh() {
            match self.identity_client()?.refresh(&data).await {
                Ok(refreshed) => {
                    let token = refreshed.id_token.clone();
                    self.session.update(refreshed);
                    self.session.save()?;
                    debug!("Session refreshed");
                    return Ok(token);
                }
                Err(e) => warn!(error = %e, "Token refresh failed, using current token"),
            }
        }
        Ok(data.id_token)
    }

    fn actor(&self) -> Result<ActorId> {
        self.actor
            .clone()
            .map(ActorId::new)
            .or_else(|| self.session.actor_id())
            .context("No actor: pass --actor or sign in with `pitlane login`")
    }

    // ========================================================================
    // Stores and engine
    // ========================================================================

    async fn open_stores(&mut self) -> Result<(Arc<dyn EntityStore>, Arc<dyn HistoryStore>)> {
        match self.config.backend {
            Backend::File => {
                let store = Arc::new(JsonFileStore::open(&self.data_dir)?);
                debug!(path = %store.path().display(), "Using file store");
                let entities: Arc<dyn EntityStore> = store.clone();
                let history: Arc<dyn HistoryStore> = store;
                Ok((entities, history))
            }
            Backend::Firestore => {
                let project = self
                    .config
                    .firebase_project
                    .clone()
                    .context("No Firebase project. Set PITLANE_FIREBASE_PROJECT")?;
                let token = self.token().await?;
                let mut client = FirestoreClient::new(project)?;
                if let Some(ref url) = self.config.firestore_url {
                    client = client.with_base_url(url.clone());
                }
                let store = Arc::new(FirestoreStore::new(client.with_token(token)));
                let entities: Arc<dyn EntityStore> = store.clone();
                let history: Arc<dyn HistoryStore> = store;
                Ok((entities, history))
            }
        }
    }

    async fn engine_for_reading(&mut self) -> Result<(AssignmentEngine, Option<ActorId>)> {
        let (entities, history) = self.open_stores().await?;
        let source = self
            .source
            .clone()
            .unwrap_or_else(|| self.config.source.clone());
        let engine = AssignmentEngine::new(entities, HistoryLedger::new(history))
            .with_policy(self.config.capacity_policy())
            .with_instructor_policy(self.config.instructor_policy)
            .with_source(source);
        Ok((engine, self.actor().ok()))
    }

    async fn engine(&mut self) -> Result<(AssignmentEngine, ActorId)> {
        let actor = self.actor()?;
        let (engine, _) = self.engine_for_reading().await?;
        Ok((engine, actor))
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn seed(&mut self, file: &Path) -> Result<()> {
        let contents = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", file.display()))?;
        for group in &snapshot.groups {
            group.validate().map_err(anyhow::Error::msg)?;
        }
        let violations = capacity::audit(
            &snapshot.members,
            &snapshot.resources,
            &snapshot.groups,
            &self.config.capacity_policy(),
        );
        if !violations.is_empty() {
            for violation in &violations {
                eprintln!("{}", violation);
            }
            bail!(
                "{} is inconsistent ({} problem(s)); nothing was loaded",
                file.display(),
                violations.len()
            );
        }
        if !snapshot.history.is_empty() {
            warn!(
                entries = snapshot.history.len(),
                "Seed file history entries are ignored"
            );
        }

        let (entities, _) = self.open_stores().await?;
        for member in &snapshot.members {
            entities.put_member(member).await?;
        }
        for resource in &snapshot.resources {
            entities.put_resource(resource).await?;
        }
        for group in &snapshot.groups {
            entities.put_group(group).await?;
        }

        info!(
            members = snapshot.members.len(),
            resources = snapshot.resources.len(),
            groups = snapshot.groups.len(),
            "Seeded store"
        );
        println!(
            "Seeded {} kids, {} vehicles, {} teams",
            snapshot.members.len(),
            snapshot.resources.len(),
            snapshot.groups.len()
        );
        Ok(())
    }

    async fn roster(&mut self) -> Result<()> {
        let (entities, _) = self.open_stores().await?;
        let (members, resources, groups) = list_all(entities.as_ref()).await?;
        for line in roster_lines(&members, &resources, &groups) {
            println!("{}", line);
        }
        Ok(())
    }

    async fn instructor(&mut self, cmd: InstructorCommand) -> Result<()> {
        let (engine, actor) = self.engine().await?;
        match cmd {
            InstructorCommand::Add { group, instructor } => {
                let outcome = engine
                    .assign_instructor(
                        &GroupId::new(group.clone()),
                        &ActorId::new(instructor.clone()),
                        &actor,
                    )
                    .await?;
                if outcome.is_unchanged() {
                    println!("{} already instructs {}", instructor, group);
                } else {
                    println!("{} now instructs {}", instructor, group);
                }
            }
            InstructorCommand::Remove { group, instructor } => {
                let outcome = engine
                    .remove_instructor(
                        &GroupId::new(group.clone()),
                        &ActorId::new(instructor.clone()),
                        &actor,
                    )
                    .await?;
                if outcome.is_unchanged() {
                    println!("{} does not instruct {}", instructor, group);
                } else {
                    println!("{} no longer instructs {}", instructor, group);
                }
            }
        }
        Ok(())
    }
}

async fn list_all(
    entities: &dyn EntityStore,
) -> Result<(Vec<Member>, Vec<Resource>, Vec<Group>)> {
    let members = entities.list_members().await?;
    let resources = entities.list_resources().await?;
    let groups = entities.list_groups().await?;
    Ok((members, resources, groups))
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Unchanged => println!("No change"),
        Outcome::Applied { record: Some(record) } => println!("{}", describe(record)),
        Outcome::Applied { record: None } => {
            println!("Done (the history entry could not be written)")
        }
    }
}

fn history_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if now - timestamp > Duration::days(RELATIVE_TIME_MAX_DAYS) {
        format_timestamp(timestamp)
    } else {
        relative_time(timestamp, now)
    }
}

/// One line per entry: age, sentence, actor.
fn history_lines(records: &[HistoryRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec!["No history".to_string()];
    }
    let now = Utc::now();
    records
        .iter()
        .map(|r| {
            format!(
                "{:>9}  {}  [{}]",
                history_time(r.timestamp, now),
                describe(r),
                r.actor_id
            )
        })
        .collect()
}

fn roster_lines(members: &[Member], resources: &[Resource], groups: &[Group]) -> Vec<String> {
    let members_by_id: HashMap<&MemberId, &Member> = members.iter().map(|m| (&m.id, m)).collect();
    let resources_by_id: HashMap<&ResourceId, &Resource> =
        resources.iter().map(|r| (&r.id, r)).collect();

    let mut groups: Vec<&Group> = groups.iter().collect();
    groups.sort_by(|a, b| a.name.cmp(&b.name));

    let mut lines = Vec::new();
    for group in groups {
        lines.push(format!("{} [{}] {}", group.name, group.id, group.occupancy_display()));
        if !group.instructor_ids.is_empty() {
            let instructors: Vec<&str> = group.instructor_ids.iter().map(|i| i.as_str()).collect();
            lines.push(format!("  instructors: {}", instructors.join(", ")));
        }
        for member_id in &group.member_ids {
            let Some(member) = members_by_id.get(member_id) else {
                lines.push(format!("  {} (missing)", member_id));
                continue;
            };
            let vehicle = member
                .resource_id
                .as_ref()
                .map(|id| {
                    resources_by_id
                        .get(id)
                        .map_or_else(|| id.to_string(), |r| r.name.clone())
                })
                .unwrap_or_else(|| "-".to_string());
            let mut line = format!("  {} [{}] -> {}", member.name, member.id, vehicle);
            if let Some(ref notes) = member.notes {
                line.push_str(&format!("  ({})", truncate(notes, NOTES_DISPLAY_LEN)));
            }
            lines.push(line);
        }
        for resource_id in &group.resource_ids {
            match resources_by_id.get(resource_id) {
                Some(resource) => lines.push(format!(
                    "  * {} [{}] {}",
                    resource.name, resource.id, resource.status
                )),
                None => lines.push(format!("  * {} (missing)", resource_id)),
            }
        }
    }

    let mut unteamed: Vec<&Member> = members.iter().filter(|m| m.group_id.is_none()).collect();
    unteamed.sort_by(|a, b| a.name.cmp(&b.name));
    if !unteamed.is_empty() {
        lines.push("No team".to_string());
        for member in unteamed {
            lines.push(format!("  {} [{}]", member.name, member.id));
        }
    }
    lines
}
