use serde_json::json;
use stpl::template::Template;
use test_log::test;

fn render(source: &str, env: serde_json::Value) -> String {
    Template::new("test", source)
        .unwrap()
        .render_to_string(env)
        .unwrap()
}

#[test]
fn test_plain_text_round_trips() {
    let source = "line one\n  indented\n\nlast line without newline";
    assert_eq!(render(source, json!({})), source);
}

#[test]
fn test_crlf_line_endings_are_normalized() {
    assert_eq!(render("a\r\nb\r\n", json!({})), "a\nb\n");
}

#[test]
fn test_substitutions_left_to_right() {
    let out = render("{{ a }}-{{ b }}-{{ a ~ b }}\n", json!({"a": "x", "b": "y"}));
    assert_eq!(out, "x-y-xy\n");
}

#[test]
fn test_condition() {
    let source = "Hi {{ name }}!\n% if flag:\nYes\n% end\n";
    assert_eq!(render(source, json!({"name": "Bob", "flag": true})), "Hi Bob!\nYes\n");
    assert_eq!(render(source, json!({"name": "Bob", "flag": false})), "Hi Bob!\n");
}

#[test]
fn test_elif_chain() {
    let source = "% if n > 10:\nbig\n% elif n > 5:\nmedium\n% else:\nsmall\n% end\n";
    assert_eq!(render(source, json!({"n": 20})), "big\n");
    assert_eq!(render(source, json!({"n": 7})), "medium\n");
    assert_eq!(render(source, json!({"n": 1})), "small\n");
}

#[test]
fn test_for_loop() {
    let source = "% for i in range(3):\n{{ i }},\n% end\n";
    assert_eq!(render(source, json!({})), "0,\n1,\n2,\n");
}

#[test]
fn test_for_else_runs_unless_broken() {
    let source = "% for item in items:\n- {{ item }}\n% if item == stop:\n% break\n% end\n% else:\nend\n% end\n";
    assert_eq!(render(source, json!({"items": [], "stop": "x"})), "end\n");
    assert_eq!(render(source, json!({"items": ["a"], "stop": "x"})), "- a\nend\n");
    assert_eq!(render(source, json!({"items": ["a", "x", "b"], "stop": "x"})), "- a\n- x\n");
}

#[test]
fn test_tuple_unpacking() {
    let source = "% for key, value in pairs:\n{{ key }}={{ value }}\n% end\n";
    let out = render(source, json!({"pairs": [["a", 1], ["b", 2]]}));
    assert_eq!(out, "a=1\nb=2\n");
}

#[test]
fn test_break_and_continue() {
    let source = "% for i in range(5):\n% if i == 3:\n% break\n% end\n% if i == 1:\n% continue\n% end\n{{ i }}\n% end\n";
    assert_eq!(render(source, json!({})), "0\n2\n");
}

#[test]
fn test_while_and_augmented_assignment() {
    let source = "<%\nn = 0\nwhile n < 3:\n    n += 1\n    yield n\n%>\n";
    assert_eq!(render(source, json!({})), "123");
}

#[test]
fn test_with_statement() {
    let source = "% with items|length as count:\n{{ count }} items\n% end\n";
    assert_eq!(render(source, json!({"items": [1, 2, 3]})), "3 items\n");
}

#[test]
fn test_inline_code_regions() {
    assert_eq!(render("a<% yield 'b' %>c\n", json!({})), "abc\n");
    assert_eq!(render("a<% pass %>\n", json!({})), "a\n");
    assert_eq!(render("<% pass %>b\n", json!({})), "b\n");
    assert_eq!(render("    <% x = 1 %>{{ x }}\n", json!({})), "    1\n");
}

#[test]
fn test_yield_from() {
    assert_eq!(render("<% yield from ['a', 'b'] %>\n", json!({})), "ab");
}

#[test]
fn test_multi_line_code_region() {
    let source = "<%\n'''\nA docstring\n'''\nitems = [\n    1,\n    2,\n]\nfor i in items:\n    yield i * 10\n%>\ndone\n";
    assert_eq!(render(source, json!({})), "1020done\n");
}

#[test]
fn test_percent_in_text() {
    assert_eq!(render("100%\n50 % 3\n", json!({})), "100%\n50 % 3\n");
}

#[test]
fn test_namespace_globals() {
    let source = "{{ defined('a') }} {{ defined('b') }} {{ get('b', 'none given') }} {{ len(a) }} {{ str(1) ~ '!' }}\n";
    assert_eq!(render(source, json!({"a": [1, 2]})), "true false none given 2 1!\n");
}

#[test]
fn test_statement_locals_do_not_leak_into_blocks() {
    let source = "% x = 1\n% block b\n{{ defined('x') }}\n% end\n";
    assert_eq!(render(source, json!({})), "false\n");
}

#[test]
fn test_code_listing() {
    let template = Template::new("listing", "Hi {{ name }}\n% block body\nB\n% end\n").unwrap();
    let code = template.code();
    assert!(code.contains("def __template__():"));
    assert!(code.contains("yield \"Hi %s\\n\" % (name)"));
    assert!(code.contains("yield from block(\"body\")"));
    assert_eq!(template.source(), "Hi {{ name }}\n% block body\nB\n% end\n");
    assert_eq!(template.name(), "listing");
}

#[test]
fn test_streaming_is_lazy() {
    let template = Template::new("lazy", "first\n% x = missing\nsecond\n").unwrap();
    let mut fragments = template.render(json!({})).unwrap();
    assert_eq!(fragments.next().unwrap().unwrap(), "first\n");
    assert!(fragments.next().unwrap().is_err());
    assert!(fragments.next().is_none());
}

#[test]
fn test_setdefault_binds_missing_names() {
    let source = "% setdefault('title', 'Untitled')\n{{ title }} {{ setdefault('n', 3) }} {{ n }}\n";
    assert_eq!(render(source, json!({})), "Untitled 3 3\n");
    assert_eq!(render(source, json!({"title": "Home", "n": 1})), "Home 1 1\n");
}

#[test]
fn test_block_function() {
    let source = "% block greet, who='a'\nHi {{ who }}\n% end\n<% yield from block('greet', who='b') %>\n% yield block('greet', who='c')\n";
    assert_eq!(render(source, json!({})), "Hi a\nHi b\nHi c\n");
}

#[test]
fn test_block_function_for_unknown_block_renders_nothing() {
    assert_eq!(render("a\n% yield from block('nowhere')\nb\n", json!({})), "a\nb\n");
}
