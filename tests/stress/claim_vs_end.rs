//! Concurrency test: claims racing the end of their session.
//!
//! Every enrolled student must end up with exactly one record: Present if
//! the claim landed before the session closed, Absent from backfill
//! otherwise. Never both, never neither.

use std::sync::{Arc, Barrier};
use std::thread;

use attendance_integrity::directory::InMemoryDirectory;
use attendance_integrity::notify::MemoryNotifier;
use attendance_integrity::{
    AccountId, AttendanceEngine, AttendanceError, AttendanceStatus, Caller, Claim, Collaborators,
    Coordinates, CourseId, DeviceId, EngineConfig, Role,
};

const T0: u64 = 1_700_000_000_000;
const STUDENTS: usize = 48;

fn run_race(round: u64) {
    let course = CourseId::from("EE-310");
    let mut dir = InMemoryDirectory::new();
    dir.add_course("EE-310", "Signals")
        .add_account("teacher", "Teacher", Role::Teacher);
    for i in 0..STUDENTS {
        let id = format!("s{i}");
        dir.add_account(id.as_str(), id.as_str(), Role::Student);
        dir.enroll(&course, &AccountId::from(id)).unwrap();
    }
    let engine = Arc::new(
        AttendanceEngine::new(
            EngineConfig::default(),
            Collaborators::from_directory(Arc::new(dir))
                .with_notifier(Arc::new(MemoryNotifier::new())),
        )
        .unwrap(),
    );

    let teacher = Caller::new("teacher", Role::Teacher);
    let start = T0 + round * 10_000_000;
    let session = engine
        .start_session_at(&teacher, &course, Some(Coordinates::new(0.0, 0.0)), None, start)
        .unwrap();
    let token = engine
        .current_token_at(&teacher, &session.id, start)
        .unwrap()
        .token;

    let barrier = Arc::new(Barrier::new(STUDENTS + 1));
    let mut handles = Vec::new();
    for i in 0..STUDENTS {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        let claim = Claim {
            session_id: session.id.clone(),
            claimant: AccountId::from(format!("s{i}")),
            device: DeviceId::from(format!("d{i}")),
            token: token.clone(),
            location: Coordinates::new(0.0, 0.0),
            proof_image: None,
        };
        handles.push(thread::spawn(move || {
            barrier.wait();
            let caller = Caller::new(claim.claimant.clone(), Role::Student);
            match engine.submit_claim_at(&caller, &claim, start + 1_000) {
                Ok(_) => {}
                Err(AttendanceError::SessionInactive(_)) => {}
                Err(e) => panic!("unexpected rejection for {}: {e}", claim.claimant),
            }
        }));
    }

    let ender = {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        let id = session.id.clone();
        thread::spawn(move || {
            barrier.wait();
            engine
                .end_session_at(&Caller::new("teacher", Role::Teacher), &id, start + 1_500)
                .expect("end succeeds exactly once")
        })
    };

    for h in handles {
        h.join().unwrap();
    }
    let closure = ender.join().unwrap();

    let records = engine.ledger().records_for_session(&session.id);
    assert_eq!(records.len(), STUDENTS, "one record per enrolled student");
    let present = records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Present)
        .count();
    assert_eq!(present, closure.present.len());
    assert_eq!(STUDENTS - present, closure.backfilled.len());
}

#[test]
fn stress_claims_racing_session_end() {
    for round in 0..20 {
        run_race(round);
    }
}
