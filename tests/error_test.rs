use std::io;

use serde_json::json;
use stpl::error::Error;
use stpl::template::Template;
use test_log::test;

fn compile_error(source: &str) -> Error {
    Template::new("broken", source).unwrap_err()
}

#[test]
fn test_error_conversion() {
    let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
    let err: Error = io_err.into();
    assert!(matches!(err, Error::IoError(_)));

    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: Error = json_err.into();
    assert!(matches!(err, Error::JsonError(_)));
}

#[test]
fn test_error_display() {
    let err = Error::ConfigError("invalid config".to_string());
    assert_eq!(err.to_string(), "Configuration error: invalid config.");

    let err = Error::SyntaxError {
        message: "Unmatched 'end' token".to_string(),
        line: 3,
    };
    assert_eq!(
        err.to_string(),
        "Template syntax error: Unmatched 'end' token (line 3)."
    );

    let err = Error::TemplateNotFoundError {
        name: "page".to_string(),
    };
    assert_eq!(err.to_string(), "Template 'page' not found.");

    let err = Error::RenderError {
        template: "page".to_string(),
        line: 2,
        message: "boom".to_string(),
    };
    assert_eq!(err.to_string(), "Render error in page (line 2): boom.");
}

#[test]
fn test_error_line() {
    assert_eq!(compile_error("a\nb\n% end\n").line(), Some(3));
    assert_eq!(Error::ContextError("cycle".to_string()).line(), None);
}

#[test]
fn test_unmatched_end() {
    assert!(matches!(
        compile_error("% end\n"),
        Error::SyntaxError { line: 1, .. }
    ));
}

#[test]
fn test_directives_need_a_name() {
    for source in ["% extends\n", "% rebase\n", "% block\n", "% include\n"] {
        assert!(
            matches!(compile_error(source), Error::ValueError { line: 1, .. }),
            "{source}"
        );
    }
}

#[test]
fn test_metadata_inside_a_block() {
    let source = "% block a\n% extends base\n% end\n";
    assert!(matches!(
        compile_error(source),
        Error::SyntaxError { line: 2, .. }
    ));
    let source = "% if x:\n% rebase layout\n% end\n";
    assert!(matches!(
        compile_error(source),
        Error::SyntaxError { line: 2, .. }
    ));
}

#[test]
fn test_metadata_defined_twice() {
    assert!(matches!(
        compile_error("% extends a\n% extends b\n"),
        Error::SyntaxError { line: 2, .. }
    ));
}

#[test]
fn test_block_defined_twice() {
    assert!(matches!(
        compile_error("% block a\n% end\n% block a\n% end\n"),
        Error::SyntaxError { line: 3, .. }
    ));
}

#[test]
fn test_block_super_outside_block() {
    assert!(matches!(
        compile_error("% block.super\n"),
        Error::SyntaxError { line: 1, .. }
    ));
}

#[test]
fn test_redent_without_statement() {
    assert!(matches!(
        compile_error("% else:\n"),
        Error::SyntaxError { line: 1, .. }
    ));
}

#[test]
fn test_empty_substitution() {
    assert!(matches!(
        compile_error("ok\nHi {{ }}\n"),
        Error::SyntaxError { line: 2, .. }
    ));
}

#[test]
fn test_break_outside_loop() {
    assert!(matches!(
        compile_error("% break\n"),
        Error::SyntaxError { .. }
    ));
}

#[test]
fn test_unsupported_statements() {
    for source in ["% import os\n", "% def f():\n% end\n", "% return 1\n"] {
        assert!(
            matches!(compile_error(source), Error::SyntaxError { .. }),
            "{source}"
        );
    }
}

#[test]
fn test_invalid_expression() {
    assert!(matches!(
        compile_error("% if (:\n% end\n"),
        Error::SyntaxError { .. }
    ));
}

#[test]
fn test_render_error_names_template_and_line() {
    let template = Template::new("page", "% x = 1\n{{ missing }}\n").unwrap();
    match template.render_to_string(json!({})).unwrap_err() {
        Error::RenderError { template, line, .. } => {
            assert_eq!(template, "page");
            assert_eq!(line, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_standalone_template_cannot_extend() {
    let template = Template::new("child", "% extends base\n").unwrap();
    assert!(matches!(
        template.render(json!({})),
        Err(Error::ContextError(_))
    ));
}

#[test]
fn test_environment_must_be_a_mapping() {
    let template = Template::new("page", "x\n").unwrap();
    assert!(matches!(
        template.render(json!([1, 2])),
        Err(Error::ContextError(_))
    ));
}
