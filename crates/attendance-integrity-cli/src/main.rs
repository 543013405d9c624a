//! Attendance integrity CLI: the `attend` command.
//!
//! Runs sessions, shows rotating credentials, submits claims and reports
//! attendance against a state directory on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use attendance_integrity::biometric::FsImageStore;
use attendance_integrity::directory::InMemoryDirectory;
use attendance_integrity::ledger::AttendanceStatus;
use attendance_integrity::storage::StateStore;
use attendance_integrity::time::millis_to_display;
use attendance_integrity::{
    AccountId, AttendanceEngine, Caller, Claim, Collaborators, Coordinates, CourseId,
    CredentialToken, DeviceId, Role, SessionId,
};

/// Overrides `security_contact` from `config.json`.
const SECURITY_CONTACT_ENV: &str = "ATTEND_SECURITY_CONTACT";

// ── Directory helpers ─────────────────────────────────────────────────────────

fn default_state_dir() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".attend"))
        .unwrap_or_else(|_| PathBuf::from(".attend"))
}

// ── CLI structure ─────────────────────────────────────────────────────────────

/// Attendance integrity CLI: rotating credentials, geofenced claims and
/// attendance reports.
#[derive(Parser, Debug)]
#[command(
    name = "attend",
    about = "Attendance integrity CLI",
    version,
    long_about = "attend: attendance integrity CLI\n\nStart sessions, display rotating credentials, submit claims,\nand report attendance. State lives in a directory of JSON files."
)]
struct Cli {
    /// State directory (default: ~/.attend)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Account to act as; the role comes from the directory
    #[arg(long = "as", global = true)]
    caller: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage teaching sessions
    Session {
        #[command(subcommand)]
        subcommand: SessionCommands,
    },

    /// Submit an attendance claim
    Claim {
        /// Session to claim attendance for
        #[arg(long)]
        session: String,

        /// Credential payload shown by the teacher
        #[arg(long)]
        token: String,

        /// Device identifier of this client
        #[arg(long)]
        device: String,

        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Path to a live photo for the biometric check
        #[arg(long)]
        proof: Option<PathBuf>,
    },

    /// Attendance statistics
    Stats {
        #[command(subcommand)]
        subcommand: StatsCommands,
    },

    /// Manually set a student's status for an active session
    Mark {
        #[arg(long)]
        session: String,

        #[arg(long)]
        student: String,

        /// present or absent
        #[arg(long)]
        status: String,
    },

    /// Trusted-device administration
    Device {
        #[command(subcommand)]
        subcommand: DeviceCommands,
    },

    /// Courses, accounts and enrollment
    Directory {
        #[command(subcommand)]
        subcommand: DirectoryCommands,
    },
}

#[derive(Subcommand, Debug)]
enum SessionCommands {
    /// Start a session at the given location
    Start {
        #[arg(long)]
        course: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,

        /// Geofence radius in meters (default from config)
        #[arg(long)]
        radius: Option<f64>,
    },

    /// End a session and backfill absentees
    End { session: String },

    /// Show active sessions (for a course, or the caller's own)
    Active {
        #[arg(long)]
        course: Option<String>,
    },

    /// Attendance report for one session
    Report { session: String },

    /// Current credential for a session
    Token { session: String },
}

#[derive(Subcommand, Debug)]
enum StatsCommands {
    /// Per-student attendance for a course
    Course {
        #[arg(long)]
        course: String,
    },

    /// Per-course attendance for a student (default: the caller)
    Student {
        #[arg(long)]
        student: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceCommands {
    /// Clear a student's trusted device
    Reset {
        #[arg(long)]
        account: String,
    },
}

#[derive(Subcommand, Debug)]
enum DirectoryCommands {
    /// Create an empty directory in the state directory
    Init {
        /// Overwrite an existing directory
        #[arg(long)]
        force: bool,
    },

    /// Add or replace a course
    AddCourse {
        #[arg(long)]
        id: String,

        #[arg(long)]
        name: String,
    },

    /// Add or replace an account
    AddAccount {
        #[arg(long)]
        id: String,

        #[arg(long)]
        name: String,

        /// admin, teacher, student or guardian
        #[arg(long)]
        role: String,

        /// Guardian contact for attendance notices
        #[arg(long)]
        guardian: Option<String>,

        /// Reference image URL for biometric checks
        #[arg(long)]
        reference_image: Option<String>,
    },

    /// Enroll a student in a course
    Enroll {
        #[arg(long)]
        course: String,

        #[arg(long)]
        student: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let state_dir = cli.state.clone().unwrap_or_else(default_state_dir);
    let ctx = Ctx {
        state_dir,
        caller: cli.caller.clone(),
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Session { subcommand } => match subcommand {
            SessionCommands::Start {
                course,
                lat,
                lon,
                radius,
            } => cmd_session_start(&ctx, &course, lat, lon, radius),
            SessionCommands::End { session } => cmd_session_end(&ctx, &session),
            SessionCommands::Active { course } => cmd_session_active(&ctx, course.as_deref()),
            SessionCommands::Report { session } => cmd_session_report(&ctx, &session),
            SessionCommands::Token { session } => cmd_session_token(&ctx, &session),
        },
        Commands::Claim {
            session,
            token,
            device,
            lat,
            lon,
            proof,
        } => cmd_claim(&ctx, &session, &token, &device, lat, lon, proof.as_deref()),
        Commands::Stats { subcommand } => match subcommand {
            StatsCommands::Course { course } => cmd_stats_course(&ctx, &course),
            StatsCommands::Student { student } => cmd_stats_student(&ctx, student.as_deref()),
        },
        Commands::Mark {
            session,
            student,
            status,
        } => cmd_mark(&ctx, &session, &student, &status),
        Commands::Device { subcommand } => match subcommand {
            DeviceCommands::Reset { account } => cmd_device_reset(&ctx, &account),
        },
        Commands::Directory { subcommand } => match subcommand {
            DirectoryCommands::Init { force } => cmd_directory_init(&ctx, force),
            DirectoryCommands::AddCourse { id, name } => cmd_directory_add_course(&ctx, &id, &name),
            DirectoryCommands::AddAccount {
                id,
                name,
                role,
                guardian,
                reference_image,
            } => cmd_directory_add_account(
                &ctx,
                &id,
                &name,
                &role,
                guardian.as_deref(),
                reference_image.as_deref(),
            ),
            DirectoryCommands::Enroll { course, student } => {
                cmd_directory_enroll(&ctx, &course, &student)
            }
        },
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

// ── Engine context ────────────────────────────────────────────────────────────

struct Ctx {
    state_dir: PathBuf,
    caller: Option<String>,
    json: bool,
}

/// An engine loaded from the state directory, plus the acting caller.
struct Loaded {
    store: StateStore,
    engine: AttendanceEngine,
    caller: Caller,
}

impl Ctx {
    fn store(&self) -> Result<StateStore> {
        StateStore::new(&self.state_dir)
            .with_context(|| format!("cannot open state directory {}", self.state_dir.display()))
    }

    fn load(&self) -> Result<Loaded> {
        let store = self.store()?;
        let mut config = store.load_config().context("failed to load config")?;
        if let Ok(contact) = std::env::var(SECURITY_CONTACT_ENV) {
            if !contact.trim().is_empty() {
                config.security_contact = Some(contact);
            }
        }

        let directory = store
            .load_directory()
            .context("failed to load directory (run `attend directory init` first)")?;
        let caller = resolve_caller(&directory, self.caller.as_deref())?;

        let images = FsImageStore::new(store.base_dir().join("proofs"))
            .context("cannot create proof image directory")?;
        let collaborators =
            Collaborators::from_directory(Arc::new(directory)).with_image_store(Arc::new(images));

        let state = store.load_state().context("failed to load engine state")?;
        let engine = AttendanceEngine::with_state(config, collaborators, state)
            .context("failed to restore engine state")?;

        Ok(Loaded {
            store,
            engine,
            caller,
        })
    }
}

impl Loaded {
    fn save(&self) -> Result<()> {
        self.store
            .save_state(&self.engine.snapshot())
            .context("failed to save engine state")
    }
}

fn resolve_caller(directory: &InMemoryDirectory, account: Option<&str>) -> Result<Caller> {
    let account = account.ok_or_else(|| anyhow!("--as <ACCOUNT> is required"))?;
    let id = AccountId::from(account);
    let role = directory
        .role(&id)
        .ok_or_else(|| anyhow!("unknown account '{account}'"))?;
    Ok(Caller { account: id, role })
}

fn parse_role(s: &str) -> Result<Role> {
    match s.to_ascii_lowercase().as_str() {
        "admin" => Ok(Role::Admin),
        "teacher" => Ok(Role::Teacher),
        "student" => Ok(Role::Student),
        "guardian" => Ok(Role::Guardian),
        other => Err(anyhow!(
            "unknown role '{other}' (expected admin, teacher, student or guardian)"
        )),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Command implementations ───────────────────────────────────────────────────

/// `attend session start --course C --lat L --lon L [--radius M]`
fn cmd_session_start(
    ctx: &Ctx,
    course: &str,
    lat: Option<f64>,
    lon: Option<f64>,
    radius: Option<f64>,
) -> Result<()> {
    let loaded = ctx.load()?;
    let anchor = match (lat, lon) {
        (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
        (None, None) => None,
        _ => bail!("--lat and --lon must be given together"),
    };

    let session = loaded.engine.start_session(
        &loaded.caller,
        &CourseId::from(course),
        anchor,
        radius,
    )?;
    loaded.save()?;

    if ctx.json {
        return print_json(&session);
    }
    println!("Session started: {}", session.id);
    println!("  Course:  {}", session.course);
    println!("  Anchor:  {}", session.anchor);
    println!("  Radius:  {:.0}m", session.radius_m);
    println!("  Started: {}", millis_to_display(session.created_at));
    Ok(())
}

/// `attend session end SESSION`
fn cmd_session_end(ctx: &Ctx, session: &str) -> Result<()> {
    let loaded = ctx.load()?;
    let closure = loaded
        .engine
        .end_session(&loaded.caller, &SessionId::from(session))?;
    loaded.save()?;

    if ctx.json {
        return print_json(&serde_json::json!({
            "session": closure.session,
            "present": closure.present,
            "backfilled": closure.backfilled,
            "notifications_sent": closure.notifications_sent,
        }));
    }
    println!("Session ended: {}", closure.session.id);
    println!("  Present:  {}", closure.present.len());
    println!("  Absent:   {}", closure.backfilled.len());
    println!("  Notified: {}", closure.notifications_sent);
    Ok(())
}

/// `attend session active [--course C]`
fn cmd_session_active(ctx: &Ctx, course: Option<&str>) -> Result<()> {
    let loaded = ctx.load()?;
    let sessions = match course {
        Some(course) => loaded
            .engine
            .active_session(&loaded.caller, &CourseId::from(course))?
            .into_iter()
            .collect(),
        None => loaded.engine.active_sessions_for_teacher(&loaded.caller)?,
    };

    if ctx.json {
        return print_json(&sessions);
    }
    if sessions.is_empty() {
        println!("No active sessions.");
        return Ok(());
    }
    for s in &sessions {
        println!(
            "{}  course={}  teacher={}  started={}  radius={:.0}m",
            s.id,
            s.course,
            s.teacher,
            millis_to_display(s.created_at),
            s.radius_m
        );
    }
    Ok(())
}

/// `attend session report SESSION`
fn cmd_session_report(ctx: &Ctx, session: &str) -> Result<()> {
    let loaded = ctx.load()?;
    let report = loaded
        .engine
        .session_report(&loaded.caller, &SessionId::from(session))?;

    if ctx.json {
        return print_json(&report);
    }
    let state = if report.session.active { "active" } else { "ended" };
    println!("Session {} ({}, {})", report.session.id, report.session.course, state);
    println!("  Present: {}  Absent: {}", report.present, report.absent);
    for entry in &report.entries {
        println!(
            "  {:<8} {:<24} {}  {:?}",
            entry.status.as_str(),
            entry.name,
            millis_to_display(entry.recorded_at),
            entry.origin
        );
    }
    Ok(())
}

/// `attend session token SESSION`
fn cmd_session_token(ctx: &Ctx, session: &str) -> Result<()> {
    let loaded = ctx.load()?;
    let issued = loaded
        .engine
        .current_token(&loaded.caller, &SessionId::from(session))?;

    if ctx.json {
        return print_json(&issued);
    }
    println!("{}", issued.payload);
    log::info!(
        "credential issued at {}, rotates at {}",
        issued.token.issued_at,
        issued.next_rotation_at
    );
    Ok(())
}

/// `attend claim --session S --token T --device D --lat L --lon L [--proof FILE]`
fn cmd_claim(
    ctx: &Ctx,
    session: &str,
    token: &str,
    device: &str,
    lat: f64,
    lon: f64,
    proof: Option<&Path>,
) -> Result<()> {
    let loaded = ctx.load()?;
    let proof_image = match proof {
        Some(path) => Some(
            std::fs::read(path)
                .with_context(|| format!("cannot read proof image {}", path.display()))?,
        ),
        None => None,
    };

    let claim = Claim {
        session_id: SessionId::from(session),
        claimant: loaded.caller.account.clone(),
        device: DeviceId::from(device),
        token: CredentialToken::decode(token)?,
        location: Coordinates::new(lat, lon),
        proof_image,
    };

    // Only accepted claims change state.
    let record = loaded.engine.submit_claim(&loaded.caller, &claim)?;
    loaded.save()?;

    if ctx.json {
        return print_json(&record);
    }
    println!(
        "Attendance marked: {} present in session {}",
        record.student, record.session
    );
    Ok(())
}

/// `attend stats course --course C`
fn cmd_stats_course(ctx: &Ctx, course: &str) -> Result<()> {
    let loaded = ctx.load()?;
    let report = loaded
        .engine
        .course_stats(&loaded.caller, &CourseId::from(course))?;

    if ctx.json {
        return print_json(&report);
    }
    println!(
        "{} ({}): {} session(s)",
        report.course_name, report.course, report.sessions
    );
    for row in &report.rows {
        println!(
            "  {:<16} {:>3} / {:<3} {:>6.1}%",
            row.student, row.present, row.total_classes, row.percentage
        );
    }
    Ok(())
}

/// `attend stats student [--student S]`
fn cmd_stats_student(ctx: &Ctx, student: Option<&str>) -> Result<()> {
    let loaded = ctx.load()?;
    let student = student
        .map(AccountId::from)
        .unwrap_or_else(|| loaded.caller.account.clone());
    let stats = loaded.engine.student_stats(&loaded.caller, &student)?;

    if ctx.json {
        return print_json(&stats);
    }
    if stats.is_empty() {
        println!("No attendance recorded for {student}.");
        return Ok(());
    }
    println!("Attendance for {student}:");
    for row in &stats {
        println!(
            "  {:<16} {:>3} / {:<3} {:>6.1}%",
            row.course, row.stats.present, row.stats.total_classes, row.percentage
        );
    }
    Ok(())
}

/// `attend mark --session S --student S --status present|absent`
fn cmd_mark(ctx: &Ctx, session: &str, student: &str, status: &str) -> Result<()> {
    let status: AttendanceStatus = status.parse().map_err(|e: String| anyhow!(e))?;
    let loaded = ctx.load()?;
    let record = loaded.engine.manual_mark(
        &loaded.caller,
        &SessionId::from(session),
        &AccountId::from(student),
        status,
    )?;
    loaded.save()?;

    if ctx.json {
        return print_json(&record);
    }
    println!(
        "Marked {} as {} in session {}",
        record.student, record.status, record.session
    );
    Ok(())
}

/// `attend device reset --account A`
fn cmd_device_reset(ctx: &Ctx, account: &str) -> Result<()> {
    let loaded = ctx.load()?;
    let previous = loaded
        .engine
        .reset_device(&loaded.caller, &AccountId::from(account))?;
    loaded.save()?;

    match previous {
        Some(device) => println!("Cleared device {device} for {account}"),
        None => println!("{account} had no trusted device"),
    }
    Ok(())
}

/// `attend directory init [--force]`
fn cmd_directory_init(ctx: &Ctx, force: bool) -> Result<()> {
    let store = ctx.store()?;
    if store.load_directory().is_ok() && !force {
        bail!(
            "directory already exists in {} (use --force to overwrite)",
            store.base_dir().display()
        );
    }
    store.save_directory(&InMemoryDirectory::new())?;
    if !store.config_path().exists() {
        store.save_config(&store.load_config()?)?;
    }
    println!("Initialized state in {}", store.base_dir().display());
    Ok(())
}

/// Load the directory, apply `edit`, and save it back.
fn edit_directory(
    ctx: &Ctx,
    edit: impl FnOnce(&mut InMemoryDirectory) -> Result<()>,
) -> Result<()> {
    let store = ctx.store()?;
    let mut directory = store
        .load_directory()
        .context("failed to load directory (run `attend directory init` first)")?;
    edit(&mut directory)?;
    store.save_directory(&directory)?;
    Ok(())
}

/// `attend directory add-course --id C --name N`
fn cmd_directory_add_course(ctx: &Ctx, id: &str, name: &str) -> Result<()> {
    edit_directory(ctx, |dir| {
        dir.add_course(id, name);
        Ok(())
    })?;
    println!("Course {id} saved");
    Ok(())
}

/// `attend directory add-account --id A --name N --role R`
fn cmd_directory_add_account(
    ctx: &Ctx,
    id: &str,
    name: &str,
    role: &str,
    guardian: Option<&str>,
    reference_image: Option<&str>,
) -> Result<()> {
    let role = parse_role(role)?;
    edit_directory(ctx, |dir| {
        let account = AccountId::from(id);
        dir.add_account(id, name, role);
        if let Some(contact) = guardian {
            dir.set_guardian_contact(&account, contact);
        }
        if let Some(url) = reference_image {
            dir.set_reference_image(&account, url);
        }
        Ok(())
    })?;
    println!("Account {id} saved ({role})");
    Ok(())
}

/// `attend directory enroll --course C --student S`
fn cmd_directory_enroll(ctx: &Ctx, course: &str, student: &str) -> Result<()> {
    edit_directory(ctx, |dir| {
        dir.enroll(&CourseId::from(course), &AccountId::from(student))?;
        Ok(())
    })?;
    println!("Enrolled {student} in {course}");
    Ok(())
}
