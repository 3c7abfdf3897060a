//! ANSI styling and the text snippets shared by every presenter.

pub const RESET: &str = "\x1b[0m";
pub const BRIGHT: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const BLUE: &str = "\x1b[34m";

const INDENT: &str = "    ";

pub fn color_info(text: &str) -> String {
    format!("{GREEN}{text}{RESET}")
}

pub fn color_error(text: &str) -> String {
    format!("{RED}{text}{RESET}")
}

pub fn color_success(text: &str) -> String {
    format!("{BLUE}{text}{RESET}")
}

pub fn format_indent(text: &str) -> String {
    format!("{INDENT}{text}")
}

pub fn format_success(script_name: &str) -> String {
    format_indent(&format!("Execution of {script_name} succeed\n"))
}

pub fn format_failure(script_name: &str) -> String {
    format_indent(&format!("Execution of {script_name} failed\n"))
}

pub fn format_error_output(text: &str) -> String {
    format!("ERROR: {text}")
}

/// Dim red lead-in, bright red subject, dim red tail.
pub fn format_mistake(first: &str, middle: &str, last: &str) -> String {
    format!("{DIM}{RED}{first}{RESET}{RED}{BRIGHT}{middle}{DIM}{last}{RESET}")
}

/// Print a user-facing failure notice.
pub fn notify_mistake(first: &str, middle: &str, last: &str) {
    eprintln!("\n {}\n", format_mistake(first, middle, last));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lines_are_indented() {
        assert_eq!(format_success("a_1.sh"), "    Execution of a_1.sh succeed\n");
        assert_eq!(format_failure("a_1.sh"), "    Execution of a_1.sh failed\n");
    }

    #[test]
    fn colors_wrap_and_reset() {
        assert_eq!(color_info("x"), "\x1b[32mx\x1b[0m");
        assert_eq!(color_error("x"), "\x1b[31mx\x1b[0m");
        assert_eq!(color_success("x"), "\x1b[34mx\x1b[0m");
    }

    #[test]
    fn mistake_highlights_middle_part() {
        let text = format_mistake("Script directory ", "\"nope\"", " is not a directory!!!");
        assert!(text.starts_with(DIM));
        assert!(text.contains(&format!("{BRIGHT}\"nope\"")));
        assert!(text.ends_with(RESET));
        assert_eq!(format_error_output("boom"), "ERROR: boom");
    }
}
