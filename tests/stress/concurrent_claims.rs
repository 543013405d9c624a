//! Concurrency test: many threads claiming against one session.
//!
//! Validates that ledger uniqueness holds under contention: one record per
//! (session, student) and per (session, device), no matter how claims
//! interleave.

use std::sync::{Arc, Mutex};
use std::thread;

use attendance_integrity::directory::InMemoryDirectory;
use attendance_integrity::notify::MemoryNotifier;
use attendance_integrity::{
    AccountId, AttendanceEngine, AttendanceError, Caller, Claim, Collaborators, Coordinates,
    CourseId, DeviceId, EngineConfig, Role, SessionSummary,
};

const T0: u64 = 1_700_000_000_000;

fn engine_with_students(n: usize) -> (Arc<AttendanceEngine>, SessionSummary) {
    let course = CourseId::from("CS-500");
    let mut dir = InMemoryDirectory::new();
    dir.add_course("CS-500", "Distributed Systems")
        .add_account("teacher", "Teacher", Role::Teacher);
    for i in 0..n {
        let id = format!("student-{i}");
        dir.add_account(id.as_str(), id.as_str(), Role::Student);
        dir.enroll(&course, &AccountId::from(id)).unwrap();
    }

    let engine = AttendanceEngine::new(
        EngineConfig::default(),
        Collaborators::from_directory(Arc::new(dir)).with_notifier(Arc::new(MemoryNotifier::new())),
    )
    .unwrap();
    let session = engine
        .start_session_at(
            &Caller::new("teacher", Role::Teacher),
            &course,
            Some(Coordinates::new(51.5007, -0.1246)),
            Some(30.0),
            T0,
        )
        .unwrap();
    (Arc::new(engine), session)
}

fn claim(engine: &AttendanceEngine, session: &SessionSummary, student: &str, device: &str) -> Claim {
    let issued = engine
        .current_token_at(&Caller::new("teacher", Role::Teacher), &session.id, T0 + 1_000)
        .unwrap();
    Claim {
        session_id: session.id.clone(),
        claimant: AccountId::from(student),
        device: DeviceId::from(device),
        token: issued.token,
        location: Coordinates::new(51.5008, -0.1246),
        proof_image: None,
    }
}

#[test]
fn stress_64_identical_claims_yield_one_record() {
    let (engine, session) = engine_with_students(1);
    let claim = Arc::new(claim(&engine, &session, "student-0", "phone-0"));
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..64 {
        let engine = Arc::clone(&engine);
        let claim = Arc::clone(&claim);
        let outcomes = Arc::clone(&outcomes);
        handles.push(thread::spawn(move || {
            let caller = Caller::new("student-0", Role::Student);
            let result = engine.submit_claim_at(&caller, &claim, T0 + 2_000);
            outcomes.lock().unwrap().push(result);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let outcomes = outcomes.lock().unwrap();
    let accepted = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1, "exactly one claim may be accepted");
    for result in outcomes.iter().filter(|r| r.is_err()) {
        let err = result.as_ref().unwrap_err();
        assert!(err.is_duplicate_claim(), "unexpected rejection: {err}");
    }
    assert_eq!(engine.ledger().records_for_session(&session.id).len(), 1);
}

#[test]
fn stress_200_students_claim_concurrently() {
    let (engine, session) = engine_with_students(200);
    let mut handles = Vec::new();

    for t in 0..8 {
        let engine = Arc::clone(&engine);
        let session = session.clone();
        handles.push(thread::spawn(move || {
            for i in (t..200).step_by(8) {
                let student = format!("student-{i}");
                let c = claim(&engine, &session, &student, &format!("phone-{i}"));
                engine
                    .submit_claim_at(&Caller::new(student.as_str(), Role::Student), &c, T0 + 2_000)
                    .expect("each student claims once from their own device");
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(engine.ledger().present_students(&session.id).len(), 200);
    assert_eq!(engine.devices().bindings().len(), 200);
}

#[test]
fn stress_one_device_shared_by_32_students() {
    let (engine, session) = engine_with_students(32);
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = Arc::clone(&engine);
        let session = session.clone();
        let outcomes = Arc::clone(&outcomes);
        handles.push(thread::spawn(move || {
            let student = format!("student-{i}");
            let c = claim(&engine, &session, &student, "shared-phone");
            let result =
                engine.submit_claim_at(&Caller::new(student.as_str(), Role::Student), &c, T0 + 2_000);
            outcomes.lock().unwrap().push(result);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    for result in outcomes.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result,
            Err(AttendanceError::DeviceReused { .. })
                | Err(AttendanceError::StorageConflict { .. })
        ));
    }
    assert_eq!(engine.ledger().len(), 1);
}
