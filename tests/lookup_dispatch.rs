use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ldapdict::directory::{DirectoryEntry, MemoryConnector, MemoryDirectory, SearchScope};
use ldapdict::{Dict, DictError, DictOptions, DictSettings, LdapDict, LookupResult};

const SETTINGS: &str = r#"
uri = "ldap://directory.test"
base_dn = "dc=example,dc=com"
timeout = 1

[[map]]
pattern = "shared/quota/$user"
filter = "(uid=%{user})"
value_attribute = "quota"
attributes = ["user"]

[[map]]
pattern = "priv/passdb/$user"
filter = "(objectClass=posixAccount)"
value_attribute = "userPassword"
username_attribute = "uid"
base_dn = "ou=people,dc=example,dc=com"
scope = "one"
"#;

fn setup() -> (LdapDict, MemoryDirectory) {
    let connector = MemoryConnector::new();
    let directory = connector.directory("ldap://directory.test");
    let settings = DictSettings::from_toml_str(SETTINGS).expect("settings ok");
    let dict = LdapDict::open("dict.toml", settings, &DictOptions::new("svc"), &connector).expect("dict opens");
    (dict, directory)
}

fn quota(user: &str, value: &str) -> Vec<DirectoryEntry> {
    vec![DirectoryEntry::new(format!("uid={user},dc=example,dc=com")).with("quota", &[value])]
}

type Outcomes = Arc<Mutex<Vec<(String, LookupResult)>>>;

fn record(outcomes: &Outcomes, key: &str) -> ldapdict::LookupCallback {
    let outcomes = Arc::clone(outcomes);
    let key = key.to_string();
    Box::new(move |result| outcomes.lock().expect("lock").push((key, result)))
}

#[test]
fn unmatched_key_answers_inline_without_searching() {
    let (dict, directory) = setup();
    let outcomes: Outcomes = Arc::default();
    dict.lookup_async("shared/unknown/alice", record(&outcomes, "shared/unknown/alice"));
    // delivered before lookup_async returned, nothing was dispatched
    {
        let seen = outcomes.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, LookupResult::Failed(DictError::NoSuchKey("shared/unknown/alice".into())));
    }
    assert_eq!(dict.pending(), 0);
    dict.wait();
    assert!(directory.searches().is_empty());
    assert_eq!(outcomes.lock().expect("lock").len(), 1);
}

#[test]
fn out_of_order_completions_reach_their_own_callbacks() {
    let (dict, directory) = setup();
    directory
        .respond_after("(uid=alice)", Duration::from_millis(50), quota("alice", "100M"))
        .respond_after("(uid=bob)", Duration::from_millis(5), quota("bob", "2G"));
    let outcomes: Outcomes = Arc::default();
    dict.lookup_async("shared/quota/alice", record(&outcomes, "alice"));
    dict.lookup_async("shared/quota/bob", record(&outcomes, "bob"));
    assert_eq!(dict.pending(), 2);
    assert!(outcomes.lock().expect("lock").is_empty());

    dict.wait();

    assert_eq!(dict.pending(), 0);
    let seen = outcomes.lock().expect("lock");
    assert_eq!(
        *seen,
        vec![
            ("bob".to_string(), LookupResult::Found("2G".into())),
            ("alice".to_string(), LookupResult::Found("100M".into())),
        ]
    );
}

#[test]
fn pending_counts_every_dispatched_lookup() {
    let (dict, directory) = setup();
    let outcomes: Outcomes = Arc::default();
    for i in 0..5 {
        let key = format!("shared/quota/user{i}");
        dict.lookup_async(&key, record(&outcomes, &key));
    }
    assert_eq!(dict.pending(), 5);
    dict.wait();
    assert_eq!(dict.pending(), 0);
    let seen = outcomes.lock().expect("lock");
    assert_eq!(seen.len(), 5);
    assert!(seen.iter().all(|(_, result)| *result == LookupResult::NotFound));
    assert_eq!(directory.searches().len(), 5);
}

#[test]
fn wait_without_pending_returns() {
    let (dict, _directory) = setup();
    dict.wait();
    dict.wait();
    assert_eq!(dict.pending(), 0);
}

#[test]
fn blocking_lookup_outcomes() {
    let (dict, directory) = setup();
    directory
        .respond("(uid=alice)", quota("alice", "100M"))
        .respond(
            "(uid=bob)",
            vec![DirectoryEntry::new("uid=bob,dc=example,dc=com").with("cn", &["Bob"])],
        )
        .respond("(uid=carol)", vec![DirectoryEntry::new("uid=carol,dc=example,dc=com").with("quota", &[])])
        .respond(
            "(uid=dave)",
            vec![
                DirectoryEntry::new("uid=dave,dc=example,dc=com").with("Quota", &["1G", "2G"]),
                DirectoryEntry::new("uid=dave,ou=old,dc=example,dc=com").with("quota", &["5G"]),
            ],
        )
        .fail("(uid=erin)", "server unwilling to perform");

    assert_eq!(dict.lookup("shared/quota/alice"), LookupResult::Found("100M".into()));
    assert_eq!(dict.lookup("shared/quota/bob"), LookupResult::Null);
    assert_eq!(dict.lookup("shared/quota/carol"), LookupResult::Null);
    // first value of the first entry, attribute names are case-insensitive
    assert_eq!(dict.lookup("shared/quota/dave"), LookupResult::Found("1G".into()));
    assert_eq!(dict.lookup("shared/quota/frank"), LookupResult::NotFound);
    assert_eq!(
        dict.lookup("shared/quota/erin"),
        LookupResult::Failed(DictError::Directory("server unwilling to perform".into()))
    );
    assert_eq!(
        dict.lookup("nowhere"),
        LookupResult::Failed(DictError::NoSuchKey("nowhere".into()))
    );
    assert_eq!(dict.pending(), 0);
}

#[test]
fn search_carries_map_parameters() {
    let (dict, directory) = setup();
    dict.lookup("shared/quota/alice");
    dict.lookup("priv/passdb/bob");
    let searches = directory.searches();
    assert_eq!(searches.len(), 2);

    assert_eq!(searches[0].base, "dc=example,dc=com");
    assert_eq!(searches[0].scope, SearchScope::Subtree);
    assert_eq!(searches[0].filter, "(uid=alice)");
    assert_eq!(searches[0].attributes, vec!["quota"]);
    assert_eq!(searches[0].timeout, Duration::from_secs(1));

    assert_eq!(searches[1].base, "ou=people,dc=example,dc=com");
    assert_eq!(searches[1].scope, SearchScope::OneLevel);
    assert_eq!(searches[1].filter, "(&(uid=svc)(objectClass=posixAccount))");
    assert_eq!(searches[1].attributes, vec!["userPassword"]);
}

#[test]
fn slow_directory_times_out() {
    let (dict, directory) = setup();
    directory.respond_after("(uid=slow)", Duration::from_millis(1500), quota("slow", "1M"));
    match dict.lookup("shared/quota/slow") {
        LookupResult::Failed(DictError::Directory(msg)) => assert!(msg.contains("timed out"), "{msg}"),
        other => panic!("expected a timeout, got {other}"),
    }
    assert_eq!(dict.pending(), 0);
}

#[test]
fn handles_resolve_after_wait() {
    let (dict, directory) = setup();
    directory.respond("(uid=alice)", quota("alice", "100M"));
    let mut first = dict.submit("shared/quota/alice");
    let mut second = dict.submit("shared/quota/nobody");
    let mut third = dict.submit("bogus/key");
    assert_ne!(first.txid(), second.txid());
    assert_ne!(second.txid(), third.txid());
    assert!(first.try_result().is_none());
    assert!(second.try_result().is_none());
    // no map: already resolved
    assert_eq!(third.try_result(), Some(LookupResult::Failed(DictError::NoSuchKey("bogus/key".into()))));

    dict.wait();

    assert_eq!(first.try_result(), Some(LookupResult::Found("100M".into())));
    assert_eq!(second.try_result(), Some(LookupResult::NotFound));
}

#[test]
fn dict_trait_object_surface() {
    let (dict, directory) = setup();
    directory.respond("(uid=alice)", quota("alice", "100M"));
    let generic: &dyn Dict = &dict;
    assert_eq!(generic.lookup("shared/quota/alice").value(), Some("100M"));
    let outcomes: Outcomes = Arc::default();
    generic.lookup_async("shared/quota/alice", record(&outcomes, "alice"));
    generic.wait();
    assert_eq!(outcomes.lock().expect("lock").len(), 1);
}

#[test]
#[should_panic(expected = "already waiting")]
fn reentrant_wait_panics() {
    let (dict, directory) = setup();
    directory.respond_after("(uid=slow)", Duration::from_millis(300), quota("slow", "1M"));
    let dict = Arc::new(dict);
    let driver = Arc::clone(&dict);
    let _waiter = thread::spawn(move || driver.lookup("shared/quota/slow"));
    thread::sleep(Duration::from_millis(50));
    dict.wait();
}

#[tokio::test]
async fn fetch_from_async_context() {
    let (dict, directory) = setup();
    directory.respond("(uid=alice)", quota("alice", "100M"));
    let dict = Arc::new(dict);
    assert_eq!(
        dict.fetch("shared/quota/alice").await.expect("drained"),
        LookupResult::Found("100M".into())
    );
    assert_eq!(
        dict.fetch("priv/passdb/bob").await.expect("drained"),
        LookupResult::NotFound
    );
    let handle = dict.submit("shared/quota/alice");
    dict.drain().await.expect("drained");
    assert_eq!(handle.await.into_result(), Ok(Some("100M".to_string())));
}

#[test]
#[should_panic(expected = "already waiting")]
fn wait_from_inside_a_callback_panics() {
    let (dict, directory) = setup();
    directory
        .respond("(uid=alice)", quota("alice", "1"))
        .respond("(uid=bob)", quota("bob", "2"));
    let dict = Arc::new(dict);
    let inner = Arc::clone(&dict);
    dict.lookup_async(
        "shared/quota/alice",
        Box::new(move |_| {
            inner.lookup("shared/quota/bob");
        }),
    );
    dict.wait();
}

#[test]
fn callback_panics_reach_the_waiter() {
    let (dict, directory) = setup();
    directory.respond("(uid=alice)", quota("alice", "1"));
    dict.lookup_async("shared/quota/alice", Box::new(|_| panic!("callback exploded")));
    let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| dict.wait()));
    let payload = caught.expect_err("wait must resume the callback panic");
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"callback exploded"));
    // the instance stays usable afterwards
    assert_eq!(dict.pending(), 0);
    assert_eq!(dict.lookup("shared/quota/alice"), LookupResult::Found("1".into()));
}

#[test]
fn pending_drops_before_each_callback_runs() {
    let (dict, directory) = setup();
    directory
        .respond_after("(uid=alice)", Duration::from_millis(50), quota("alice", "100M"))
        .respond_after("(uid=bob)", Duration::from_millis(5), quota("bob", "2G"));
    let dict = Arc::new(dict);
    let observed: Arc<Mutex<Vec<usize>>> = Arc::default();
    for key in ["shared/quota/alice", "shared/quota/bob"] {
        let counter = Arc::clone(&dict);
        let observed = Arc::clone(&observed);
        dict.lookup_async(key, Box::new(move |_| observed.lock().expect("lock").push(counter.pending())));
    }
    dict.wait();
    // bob completes first with alice still out, alice last with nothing left
    assert_eq!(*observed.lock().expect("lock"), vec![1, 0]);
}
