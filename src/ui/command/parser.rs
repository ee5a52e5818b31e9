//! Parser for the line-oriented command grammar.

use super::{Command, CommandError, CommandResult};
use crate::debugger::FileLocation;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{digit1, multispace0, multispace1};
use nom::combinator::{eof, map, map_opt, opt, rest, verify};
use nom::sequence::{preceded, terminated};
use nom::IResult;
use nom_supreme::error::ErrorTree;
use nom_supreme::final_parser::final_parser;

type Res<'a, T> = IResult<&'a str, T, ErrorTree<&'a str>>;

/// Parse one input line into a [`Command`].
pub fn parse(input: &str) -> CommandResult<Command> {
    if input.trim().is_empty() {
        return Ok(Command::SkipInput);
    }

    final_parser(command)(input.trim())
        .map_err(|e: ErrorTree<&str>| CommandError::Parsing(e.to_string()))
}

fn command(input: &str) -> Res<Command> {
    alt((
        jump_to_page,
        breakpoint,
        remove_breakpoint,
        list_locals,
        list_globals,
        print,
        bare("n", Command::StepOver),
        bare("s", Command::StepInto),
        bare("u", Command::StepOut),
        bare("c", Command::Continue),
        bare("l", Command::ShowLine),
        bare("q", Command::Quit),
    ))(input)
}

fn bare<'a>(keyword: &'static str, command: Command) -> impl FnMut(&'a str) -> Res<'a, Command> {
    move |input| {
        map(terminated(tag(keyword), preceded(multispace0, eof)), |_| {
            command.clone()
        })(input)
    }
}

fn argument<'a>(keyword: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    preceded(
        terminated(tag(keyword), multispace1),
        verify(map(rest, str::trim), |arg: &str| !arg.is_empty()),
    )
}

fn jump_to_page(input: &str) -> Res<Command> {
    map(argument("r"), |url| Command::JumpToPage(url.to_string()))(input)
}

fn breakpoint(input: &str) -> Res<Command> {
    map_opt(argument("b"), |arg: &str| {
        // the file part may itself contain colons (windows drives), the
        // line number is whatever follows the last one
        let (file, line) = arg.rsplit_once(':')?;
        let line: u64 = line.trim().parse().ok()?;
        let file = file.trim();
        (!file.is_empty()).then(|| Command::Breakpoint(FileLocation::new(file, line)))
    })(input)
}

fn remove_breakpoint(input: &str) -> Res<Command> {
    map_opt(argument("d"), |arg: &str| {
        arg.parse::<u32>().ok().map(Command::RemoveBreakpoint)
    })(input)
}

fn group_number(input: &str) -> Res<Option<i32>> {
    opt(preceded(
        multispace1,
        map_opt(digit1, |d: &str| d.parse::<i32>().ok()),
    ))(input)
}

fn list_locals(input: &str) -> Res<Command> {
    map(
        preceded(tag("il"), terminated(group_number, preceded(multispace0, eof))),
        Command::ListLocals,
    )(input)
}

fn list_globals(input: &str) -> Res<Command> {
    map(
        preceded(tag("ig"), terminated(group_number, preceded(multispace0, eof))),
        Command::ListGlobals,
    )(input)
}

fn print(input: &str) -> Res<Command> {
    map(argument("p"), |expr| Command::Print(expr.to_string()))(input)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_workflow_commands() {
        assert_eq!(parse("n").unwrap(), Command::StepOver);
        assert_eq!(parse("s").unwrap(), Command::StepInto);
        assert_eq!(parse("u").unwrap(), Command::StepOut);
        assert_eq!(parse("c").unwrap(), Command::Continue);
        assert_eq!(parse("l").unwrap(), Command::ShowLine);
        assert_eq!(parse("q").unwrap(), Command::Quit);
        assert_eq!(parse("  c  ").unwrap(), Command::Continue);
    }

    #[test]
    fn test_breakpoint_commands() {
        assert_eq!(
            parse("b Main.cpp:4").unwrap(),
            Command::Breakpoint(FileLocation::new("Main.cpp", 4))
        );
        assert_eq!(
            parse("b c:/work/Main.cpp:12").unwrap(),
            Command::Breakpoint(FileLocation::new("c:/work/Main.cpp", 12))
        );
        assert_eq!(parse("d 3").unwrap(), Command::RemoveBreakpoint(3));

        assert!(parse("b Main.cpp").is_err());
        assert!(parse("b :4").is_err());
        assert!(parse("d x").is_err());
    }

    #[test]
    fn test_variable_commands() {
        assert_eq!(parse("il").unwrap(), Command::ListLocals(None));
        assert_eq!(parse("il 1001").unwrap(), Command::ListLocals(Some(1001)));
        assert_eq!(parse("ig").unwrap(), Command::ListGlobals(None));
        assert_eq!(parse("p *p").unwrap(), Command::Print("*p".to_string()));
        assert_eq!(
            parse("p point.x").unwrap(),
            Command::Print("point.x".to_string())
        );
    }

    #[test]
    fn test_navigation_and_noise() {
        assert_eq!(
            parse("r http://localhost:8080/").unwrap(),
            Command::JumpToPage("http://localhost:8080/".to_string())
        );
        assert_eq!(parse("").unwrap(), Command::SkipInput);
        assert_eq!(parse("   ").unwrap(), Command::SkipInput);
        assert!(parse("x").is_err());
        assert!(parse("next").is_err());
    }
}
