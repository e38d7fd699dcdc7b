//! Multiple scenarios that are performed to test sync operations correctly work
#![allow(dead_code)]

use url::Url;

use caldav_mirror::identity;
use caldav_mirror::mock_server::MockServer;

/// A change that happens on the server between two syncs
pub enum ServerChange {
    /// Create (or replace) the object with this UID
    Put { uid: &'static str, summary: &'static str },
    Delete { uid: &'static str },
    /// The server forgets its change history
    ExpireTokens,
}

pub struct SyncScenario {
    pub name: &'static str,
    /// Changes applied before the initial load
    pub initial: Vec<ServerChange>,
    /// Changes applied before each following sync
    pub rounds: Vec<Vec<ServerChange>>,
}

pub fn ical(uid: &str, summary: &str) -> String {
    format!("BEGIN:VCALENDAR\r\n\
        VERSION:2.0\r\n\
        PRODID:-//caldav-mirror//tests//EN\r\n\
        BEGIN:VEVENT\r\n\
        UID:{}\r\n\
        DTSTAMP:20210321T001600Z\r\n\
        SUMMARY:{}\r\n\
        END:VEVENT\r\n\
        END:VCALENDAR\r\n", uid, summary)
}

pub fn object_url(server: &MockServer, uid: &str) -> Url {
    identity::generate_object_url(server.collection_url(), Some(uid), true).unwrap()
}

pub fn apply_changes(server: &MockServer, changes: &[ServerChange]) {
    for change in changes {
        match change {
            ServerChange::Put{ uid, summary } => {
                server.put(&ical(uid, summary)).unwrap();
            },
            ServerChange::Delete{ uid } => {
                assert!(server.delete(&object_url(server, uid)), "{} is not on the server", uid);
            },
            ServerChange::ExpireTokens => server.expire_tokens(),
        }
    }
}

fn put(uid: &'static str, summary: &'static str) -> ServerChange {
    ServerChange::Put{ uid, summary }
}

fn delete(uid: &'static str) -> ServerChange {
    ServerChange::Delete{ uid }
}

pub fn scenarii() -> Vec<SyncScenario> {
    let mut scenarii = Vec::new();

    scenarii.push(SyncScenario {
        name: "additions only",
        initial: vec![put("A", "Event A"), put("B", "Event B")],
        rounds: vec![
            vec![put("C", "Event C")],
            vec![put("D", "Event D"), put("E", "Event E")],
        ],
    });

    scenarii.push(SyncScenario {
        name: "updates and deletions",
        initial: vec![put("A", "Event A"), put("B", "Event B"), put("C", "Event C")],
        rounds: vec![
            vec![put("A", "Event A, renamed"), delete("B")],
            vec![delete("C"), put("D", "Event D")],
            vec![],
            vec![put("A", "Event A, renamed again")],
        ],
    });

    scenarii.push(SyncScenario {
        name: "deleted then re-created",
        initial: vec![put("A", "Event A")],
        rounds: vec![
            vec![delete("A")],
            vec![put("A", "Event A is back")],
            vec![put("A", "Event A changed"), delete("A"), put("A", "Event A, third life")],
            vec![put("B", "Event B"), delete("B")],
        ],
    });

    scenarii.push(SyncScenario {
        name: "token expiry between two syncs",
        initial: vec![put("A", "Event A"), put("B", "Event B")],
        rounds: vec![
            vec![delete("A"), ServerChange::ExpireTokens, put("C", "Event C")],
            vec![put("B", "Event B, renamed")],
            vec![ServerChange::ExpireTokens],
        ],
    });

    scenarii.push(SyncScenario {
        name: "UIDs with special characters",
        initial: vec![put("team/standup", "Daily standup"), put("lunch with Bob@work", "Lunch")],
        rounds: vec![
            vec![put("team/standup", "Daily standup, moved")],
            vec![delete("team/standup"), put("a/b/c", "Nested")],
        ],
    });

    scenarii.push(SyncScenario {
        name: "empty collection at first",
        initial: vec![],
        rounds: vec![
            vec![],
            vec![put("A", "Event A")],
            vec![delete("A")],
        ],
    });

    scenarii
}
