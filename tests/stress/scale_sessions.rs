//! Scale test: a semester of sessions across several courses.
//!
//! Runs hundreds of sessions with deterministic attendance patterns and
//! checks that session counts, per-student rollups and course reports
//! agree with the pattern.

use std::sync::Arc;

use attendance_integrity::directory::InMemoryDirectory;
use attendance_integrity::notify::MemoryNotifier;
use attendance_integrity::{
    AccountId, AttendanceEngine, Caller, Claim, Collaborators, Coordinates, CourseId, DeviceId,
    EngineConfig, PercentageBasis, Role,
};

const T0: u64 = 1_700_000_000_000;
const COURSES: usize = 4;
const SESSIONS_PER_COURSE: u64 = 60;
const STUDENTS: usize = 25;

fn setup(config: EngineConfig) -> (AttendanceEngine, Arc<MemoryNotifier>) {
    let mut dir = InMemoryDirectory::new();
    dir.add_account("teacher", "Teacher", Role::Teacher);
    for s in 0..STUDENTS {
        let id = AccountId::from(format!("s{s}"));
        dir.add_account(id.clone(), id.as_str(), Role::Student);
        dir.set_guardian_contact(&id, format!("g{s}@example.com"));
    }
    for c in 0..COURSES {
        let course = CourseId::from(format!("C{c}"));
        dir.add_course(course.clone(), format!("Course {c}"));
        for s in 0..STUDENTS {
            dir.enroll(&course, &AccountId::from(format!("s{s}")))
                .unwrap();
        }
    }
    let notifier = Arc::new(MemoryNotifier::new());
    let engine = AttendanceEngine::new(
        config,
        Collaborators::from_directory(Arc::new(dir)).with_notifier(notifier.clone()),
    )
    .unwrap();
    (engine, notifier)
}

/// Student `s` attends session `n` unless `n` is a multiple of `s + 2`.
fn attends(student: usize, session: u64) -> bool {
    session % (student as u64 + 2) != 0
}

fn run_semester(engine: &AttendanceEngine) {
    let teacher = Caller::new("teacher", Role::Teacher);
    for n in 0..SESSIONS_PER_COURSE {
        for c in 0..COURSES {
            let course = CourseId::from(format!("C{c}"));
            let at = T0 + (n * COURSES as u64 + c as u64) * 3_600_000;
            let session = engine
                .start_session_at(&teacher, &course, Some(Coordinates::new(10.0, 10.0)), None, at)
                .unwrap();
            let token = engine
                .current_token_at(&teacher, &session.id, at + 60_000)
                .unwrap()
                .token;
            for s in (0..STUDENTS).filter(|&s| attends(s, n)) {
                let claim = Claim {
                    session_id: session.id.clone(),
                    claimant: AccountId::from(format!("s{s}")),
                    device: DeviceId::from(format!("device-{s}")),
                    token: token.clone(),
                    location: Coordinates::new(10.0, 10.0001),
                    proof_image: None,
                };
                engine
                    .submit_claim_at(&Caller::new(claim.claimant.clone(), Role::Student), &claim, at + 61_000)
                    .unwrap();
            }
            engine
                .end_session_at(&teacher, &session.id, at + 3_000_000)
                .unwrap();
        }
    }
}

#[test]
fn scale_240_sessions_stats_agree() {
    let (engine, notifier) = setup(EngineConfig::default());
    run_semester(&engine);

    let total_sessions = SESSIONS_PER_COURSE * COURSES as u64;
    assert_eq!(
        engine.ledger().len() as u64,
        total_sessions * STUDENTS as u64,
        "every session has one record per enrolled student"
    );
    assert_eq!(
        notifier.notices().len() as u64,
        total_sessions * STUDENTS as u64
    );

    let teacher = Caller::new("teacher", Role::Teacher);
    for c in 0..COURSES {
        let report = engine
            .course_stats(&teacher, &CourseId::from(format!("C{c}")))
            .unwrap();
        assert_eq!(report.sessions, SESSIONS_PER_COURSE);
        assert_eq!(report.basis, PercentageBasis::SessionCount);
        for row in &report.rows {
            let s: usize = row.student.as_str()[1..].parse().unwrap();
            let expected = (0..SESSIONS_PER_COURSE).filter(|&n| attends(s, n)).count() as u64;
            assert_eq!(row.present, expected, "student {s} in C{c}");
            assert_eq!(row.total_classes, SESSIONS_PER_COURSE);
        }
    }

    let s0 = engine
        .student_stats(&teacher, &AccountId::from("s0"))
        .unwrap();
    assert_eq!(s0.len(), COURSES);
    for course in &s0 {
        // s0 misses every even session.
        assert_eq!(course.stats.present, SESSIONS_PER_COURSE / 2);
        assert_eq!(course.stats.absent, SESSIONS_PER_COURSE / 2);
        assert_eq!(course.percentage, 50.0);
    }
}

#[test]
fn scale_recorded_classes_basis_matches_student_view() {
    let (engine, _) = setup(EngineConfig {
        course_stats_basis: PercentageBasis::RecordedClasses,
        ..EngineConfig::default()
    });
    run_semester(&engine);

    let teacher = Caller::new("teacher", Role::Teacher);
    let report = engine.course_stats(&teacher, &CourseId::from("C0")).unwrap();
    for row in &report.rows {
        let own = engine.student_stats(&teacher, &row.student).unwrap();
        let c0 = own
            .iter()
            .find(|c| c.course == CourseId::from("C0"))
            .unwrap();
        assert_eq!(row.total_classes, c0.stats.total_classes);
        assert_eq!(row.percentage, c0.percentage);
    }
}
