use serde_json::json;
use stpl::chunked::Chunked;
use stpl::error::{Error, Result};
use stpl::template::Template;
use test_log::test;

#[test]
fn test_template_output_in_chunks() {
    let template = Template::new("ten", "xxxxxxxxxx").unwrap();
    let chunks: Vec<String> = template
        .render_chunked(json!({}), 4)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(chunks, vec!["xxxx", "xxxx", "xx"]);
}

#[test]
fn test_small_fragments_are_joined() {
    let template = Template::new("loop", "% for i in range(6):\n{{ i }}\n% end\n").unwrap();
    let chunks: Vec<String> = template
        .render_chunked(json!({}), 5)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(chunks.concat(), "0\n1\n2\n3\n4\n5\n");
    let lengths: Vec<usize> = chunks.iter().map(String::len).collect();
    assert_eq!(lengths, vec![5, 5, 2]);
    assert_eq!(chunks, vec!["0\n1\n2", "\n3\n4\n", "5\n"]);
}

#[test]
fn test_error_is_forwarded_after_pending_output() {
    let fragments: Vec<Result<String>> = vec![
        Ok("ab".to_string()),
        Err(Error::ConfigError("boom".to_string())),
        Ok("never".to_string()),
    ];
    let mut chunked = Chunked::new(fragments.into_iter(), 10);
    assert!(chunked.next().unwrap().is_err());
    assert!(chunked.next().is_none());
}
