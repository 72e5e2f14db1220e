use serde_json::json;
use std::sync::Arc;
use stpl::template::Template;
use test_log::test;

const GREETING: &str = "Hello {{ get('name', 'nobody') }}\n";

#[test]
fn test_sequential_renders_reuse_one_context() {
    let template = Template::new("greeting", GREETING).unwrap();
    assert_eq!(template.idle_contexts(), 0);
    let first = template.render_to_string(json!({"name": "Bob"})).unwrap();
    assert_eq!(first, "Hello Bob\n");
    assert_eq!(template.idle_contexts(), 1);
    let second = template.render_to_string(json!({})).unwrap();
    assert_eq!(second, "Hello nobody\n");
    assert_eq!(template.idle_contexts(), 1);
}

#[test]
fn test_concurrent_renders_use_distinct_contexts() {
    let template = Template::new("greeting", GREETING).unwrap();
    let mut a = template.render(json!({"name": "A"})).unwrap();
    let mut b = template.render(json!({"name": "B"})).unwrap();
    assert_ne!(a.context_id(), b.context_id());
    assert_eq!(b.next().unwrap().unwrap(), "Hello B\n");
    assert_eq!(a.next().unwrap().unwrap(), "Hello A\n");
    drop(a);
    drop(b);
    assert_eq!(template.idle_contexts(), 2);
}

#[test]
fn test_context_released_when_exhausted() {
    let template = Template::new("greeting", GREETING).unwrap();
    let mut fragments = template.render(json!({})).unwrap();
    assert!(fragments.context_id().is_some());
    while fragments.next().is_some() {}
    assert!(fragments.context_id().is_none());
    assert_eq!(template.idle_contexts(), 1);
}

#[test]
fn test_context_released_when_dropped_early() {
    let template = Template::new("lines", "a\n% x = 1\nb\n").unwrap();
    let mut fragments = template.render(json!({})).unwrap();
    assert_eq!(fragments.next().unwrap().unwrap(), "a\n");
    assert_eq!(template.idle_contexts(), 0);
    drop(fragments);
    assert_eq!(template.idle_contexts(), 1);
}

#[test]
fn test_context_released_after_failure() {
    let template = Template::new("broken", "{{ missing }}\n").unwrap();
    assert!(template.render_to_string(json!({})).is_err());
    assert_eq!(template.idle_contexts(), 1);
    let out = template.render_to_string(json!({"missing": 1})).unwrap();
    assert_eq!(out, "1\n");
}

#[test]
fn test_renders_from_many_threads() {
    let template = Arc::new(Template::new("greeting", GREETING).unwrap());
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let template = Arc::clone(&template);
                scope.spawn(move || {
                    let name = format!("user{n}");
                    let out = template.render_to_string(json!({ "name": name })).unwrap();
                    assert_eq!(out, format!("Hello {name}\n"));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    });
    let idle = template.idle_contexts();
    assert!((1..=8).contains(&idle), "{idle}");
}
