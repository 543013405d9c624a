//! Integration test: engine state survives a save/restore cycle through
//! the on-disk state store.

use std::sync::Arc;

use attendance_integrity::directory::InMemoryDirectory;
use attendance_integrity::storage::StateStore;
use attendance_integrity::{
    AccountId, AttendanceEngine, AttendanceError, AttendanceStatus, Caller, Claim, Collaborators,
    Coordinates, CourseId, DeviceId, EngineConfig, Role,
};

const T0: u64 = 1_700_000_000_000;

fn directory() -> InMemoryDirectory {
    let course = CourseId::from("PHY-201");
    let mut dir = InMemoryDirectory::new();
    dir.add_course("PHY-201", "Mechanics")
        .add_account("prof", "Prof. Iyer", Role::Teacher)
        .add_account("s-1", "Meera", Role::Student)
        .add_account("s-2", "Kabir", Role::Student);
    dir.enroll(&course, &AccountId::from("s-1")).unwrap();
    dir.enroll(&course, &AccountId::from("s-2")).unwrap();
    dir
}

fn engine_from(store: &StateStore) -> AttendanceEngine {
    let directory = store.load_directory().expect("directory saved");
    AttendanceEngine::with_state(
        store.load_config().expect("config loads"),
        Collaborators::from_directory(Arc::new(directory)),
        store.load_state().expect("state loads"),
    )
    .expect("state restores")
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path()).unwrap();
    store.save_directory(&directory()).unwrap();

    let teacher = Caller::new("prof", Role::Teacher);
    let course = CourseId::from("PHY-201");

    // ── First process: start a session and accept one claim ─────────────
    let (session_id, claim) = {
        let engine = engine_from(&store);
        let session = engine
            .start_session_at(&teacher, &course, Some(Coordinates::new(28.6, 77.2)), None, T0)
            .unwrap();
        let issued = engine.current_token_at(&teacher, &session.id, T0 + 1_000).unwrap();
        let claim = Claim {
            session_id: session.id.clone(),
            claimant: AccountId::from("s-1"),
            device: DeviceId::from("meera-phone"),
            token: issued.token,
            location: Coordinates::new(28.6, 77.2),
            proof_image: None,
        };
        engine
            .submit_claim_at(&Caller::new("s-1", Role::Student), &claim, T0 + 2_000)
            .unwrap();
        store.save_state(&engine.snapshot()).unwrap();
        (session.id, claim)
    };

    // ── Second process: everything is still there ───────────────────────
    let engine = engine_from(&store);
    let active = engine.active_session(&teacher, &course).unwrap().unwrap();
    assert_eq!(active.id, session_id);
    assert_eq!(engine.ledger().len(), 1);
    assert_eq!(
        engine.devices().binding(&AccountId::from("s-1")),
        Some(DeviceId::from("meera-phone"))
    );

    // Tokens minted before the restart still authenticate; the duplicate
    // check sees the persisted record.
    assert!(matches!(
        engine.submit_claim_at(&Caller::new("s-1", Role::Student), &claim, T0 + 3_000),
        Err(AttendanceError::AlreadyMarked { .. })
    ));

    let closure = engine.end_session_at(&teacher, &session_id, T0 + 60_000).unwrap();
    assert_eq!(closure.backfilled.len(), 1);
    store.save_state(&engine.snapshot()).unwrap();

    // ── Third process: the session is ended and backfilled ─────────────
    let engine = engine_from(&store);
    assert!(engine.active_session(&teacher, &course).unwrap().is_none());
    let report = engine.session_report(&teacher, &session_id).unwrap();
    assert_eq!(report.present, 1);
    assert_eq!(report.absent, 1);
    let kabir = report
        .entries
        .iter()
        .find(|e| e.student == AccountId::from("s-2"))
        .unwrap();
    assert_eq!(kabir.status, AttendanceStatus::Absent);
}

#[test]
fn custom_config_is_honoured_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path()).unwrap();
    store.save_directory(&directory()).unwrap();
    store
        .save_config(&EngineConfig {
            default_radius_m: 50.0,
            ..EngineConfig::default()
        })
        .unwrap();

    let engine = engine_from(&store);
    let session = engine
        .start_session_at(
            &Caller::new("prof", Role::Teacher),
            &CourseId::from("PHY-201"),
            Some(Coordinates::new(0.0, 0.0)),
            None,
            T0,
        )
        .unwrap();
    assert_eq!(session.radius_m, 50.0);
}

#[test]
fn corrupt_ledger_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path()).unwrap();
    std::fs::write(dir.path().join("ledger.json"), b"{ not json").unwrap();
    assert!(matches!(
        store.load_state(),
        Err(AttendanceError::InvalidFileFormat(_))
    ));
}

#[test]
fn ledger_without_its_sessions_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path()).unwrap();
    store.save_directory(&directory()).unwrap();

    let teacher = Caller::new("prof", Role::Teacher);
    let engine = engine_from(&store);
    let session = engine
        .start_session_at(
            &teacher,
            &CourseId::from("PHY-201"),
            Some(Coordinates::new(0.0, 0.0)),
            None,
            T0,
        )
        .unwrap();
    engine.end_session_at(&teacher, &session.id, T0 + 60_000).unwrap();
    store.save_state(&engine.snapshot()).unwrap();

    // A session file that lost the session the ledger still refers to.
    std::fs::write(
        dir.path().join("sessions.json"),
        r#"{"version": 1, "data": []}"#,
    )
    .unwrap();

    let result = AttendanceEngine::with_state(
        EngineConfig::default(),
        Collaborators::from_directory(Arc::new(directory())),
        store.load_state().unwrap(),
    );
    assert!(matches!(result, Err(AttendanceError::InvalidFileFormat(_))));
}
