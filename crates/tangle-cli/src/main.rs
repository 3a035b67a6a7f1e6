mod config;

use std::{
    env::args,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{bail, Context};
use config::Config;
use tangle_backend::CompileOptions;
use tangle_runtime::{Edit, Language, Node, Tree};

fn main() {
    if let Err(e) = run() {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}

/// `1.25 ms` style, picking the largest unit that keeps the number above one.
fn format_duration(seconds: f64) -> String {
    match seconds {
        s if s >= 1.0 => format!("{s:.2} s"),
        s if s >= 1e-3 => format!("{:.2} ms", s * 1e3),
        s if s >= 1e-6 => format!("{:.2} µs", s * 1e6),
        s => format!("{:.0} ns", s * 1e9),
    }
}

/// Source bytes parsed per second.
fn format_throughput(bytes: usize, seconds: f64) -> String {
    let per_second = bytes as f64 / seconds.max(f64::EPSILON);
    match per_second {
        b if b >= 1024.0 * 1024.0 => format!("{:.2} MiB/s", b / (1024.0 * 1024.0)),
        b if b >= 1024.0 => format!("{:.2} KiB/s", b / 1024.0),
        b => format!("{b:.0} B/s"),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ErrorReporting {
    On,
    Off,
}

pub struct PhaseRunner<'a> {
    do_bench: bool,
    bytes: usize,
    iters: u32,
    file: &'a Path,
    errors: ErrorReporting,
}

impl<'a> PhaseRunner<'a> {
    pub fn run<F: FnMut() -> T, T>(&self, name: &str, mut fun: F) -> T {
        let start = Instant::now();
        let mut output = fun();
        for _ in 1..self.iters {
            output = fun();
        }
        let elapsed = (start.elapsed() / self.iters).as_secs_f64();

        if self.do_bench {
            eprintln!(
                "{name:<8} {:>10} {:>12}  ({} iterations)",
                format_duration(elapsed),
                format_throughput(self.bytes, elapsed),
                self.iters
            );
        }
        output
    }

    pub fn report_errors(&self, tree: &Tree, src: &[u8]) {
        if self.errors == ErrorReporting::Off {
            return;
        }
        let file = self.file.display();
        let mut errors = Vec::new();
        collect_errors(tree.root_node(), &mut errors);
        for node in errors {
            let (line, column) = line_column(src, node.start_byte());
            let text = String::from_utf8_lossy(node.text(src));
            eprintln!("{file}:{line}:{column} syntax error near {text:?}");
        }
    }
}

fn collect_errors<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    if node.is_error() {
        out.push(node);
        return;
    }
    if node.has_error() {
        for child in node.children() {
            collect_errors(child, out);
        }
    }
}

/// One based line and column of a byte offset.
fn line_column(src: &[u8], offset: usize) -> (usize, usize) {
    let before = &src[..offset.min(src.len())];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = before.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
    (line, offset - line_start + 1)
}

/// Parses `START:OLD_LEN:TEXT`, `\n` in the text stands for a newline.
fn parse_edit(arg: &str) -> anyhow::Result<(usize, usize, String)> {
    let mut parts = arg.splitn(3, ':');
    let (Some(start), Some(old_len), Some(text)) = (parts.next(), parts.next(), parts.next()) else {
        bail!("Expected START:OLD_LEN:TEXT, got `{arg}`");
    };
    let start = start.parse().with_context(|| format!("Bad edit start `{start}`"))?;
    let old_len = old_len
        .parse()
        .with_context(|| format!("Bad edit length `{old_len}`"))?;
    Ok((start, old_len, text.replace("\\n", "\n")))
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    simplelog::TermLogger::init(
        config.level(),
        simplelog::ConfigBuilder::new()
            .set_time_format_custom(&[])
            .build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Never,
    )
    .context("Failed to install the logger")
}

fn print_tokens(tree: &Tree, src: &[u8], print_extras: bool) {
    for leaf in tree.leaves() {
        if leaf.is_extra() && !print_extras {
            continue;
        }
        let range = leaf.byte_range();
        let text = String::from_utf8_lossy(leaf.text(src));
        println!("{} {}..{} {text:?}", leaf.kind_name(), range.start, range.end);
    }
}

fn print_tree(tree: &Tree, src: &[u8], do_tree: bool, do_sexp: bool, do_tokens: bool, print_extras: bool) -> anyhow::Result<()> {
    if do_tree {
        let mut out = String::new();
        tree.display_into(&mut out, src, print_extras)
            .context("Failed to print the tree")?;
        print!("{out}");
    }
    if do_sexp {
        println!("{}", tree.to_sexp());
    }
    if do_tokens {
        print_tokens(tree, src, print_extras);
    }
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let args = args().skip(1).collect::<Vec<_>>();

    let mut do_tree = false;
    let mut do_tokens = false;
    let mut do_sexp = false;
    let mut print_extras = false;
    let mut edits = Vec::new();

    let mut do_bench = false;
    let mut bench_iters = 1;
    let mut errors = ErrorReporting::On;
    let mut config_path: Option<PathBuf> = None;

    let mut files = Vec::new();
    let mut iter = args.iter().map(String::as_str);

    while let Some(arg) = iter.next() {
        match arg {
            "--tree" => do_tree = true,
            "--tokens" => do_tokens = true,
            "--sexp" => do_sexp = true,
            "--extras" => print_extras = true,
            "--edit" => {
                let next = iter.next().context("Expected argument to --edit")?;
                edits.push(parse_edit(next)?);
            }
            "--errors" => match iter.next() {
                Some("on") => errors = ErrorReporting::On,
                Some("off") => errors = ErrorReporting::Off,
                other => bail!("Unexpected argument to --errors: {other:?}"),
            },
            "--bench" => do_bench = true,
            "--iters" => {
                let next = iter.next().context("Expected argument to --iters")?;
                bench_iters = next
                    .parse::<u32>()
                    .with_context(|| format!("Expected number, got `{next}`"))?
                    .max(1);
            }
            "--config" => {
                let next = iter.next().context("Expected argument to --config")?;
                config_path = Some(next.into());
            }
            _ => files.push(arg),
        }
    }

    let config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    init_logging(&config)?;
    print_extras |= bool::from(config.print_extras);

    let path: PathBuf = match files.as_slice() {
        [] => bail!("No file provided"),
        [file] => file.into(),
        _ => bail!("Only one file may be provided"),
    };
    let mut src = std::fs::read(&path).with_context(|| format!("Failed to read `{}`", path.display()))?;

    let runner = PhaseRunner {
        do_bench,
        bytes: src.len(),
        iters: bench_iters,
        file: &path,
        errors,
    };

    let language: Language = runner.run("compile", || {
        match bool::from(config.strict_conflicts) {
            true => tangle_cpp::language_with(&CompileOptions { strict: true }),
            false => tangle_cpp::language().cloned().map_err(Clone::clone),
        }
    })?;

    let mut tree = runner.run("parse", || tangle_runtime::parse(&language, &src));

    for (start, old_len, text) in edits {
        if start > src.len() {
            bail!("Edit at {start} is past the end of the file ({} bytes)", src.len());
        }
        let (edit, new_src) = Edit::apply(&src, start, old_len, text.as_bytes());
        tree = runner.run("reparse", || tangle_runtime::reparse(&language, &tree, &edit, &new_src));
        src = new_src;
    }

    runner.report_errors(&tree, &src);
    print_tree(&tree, &src, do_tree, do_sexp, do_tokens, print_extras)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_argument() {
        assert_eq!(parse_edit("4:2:ab:c\\n").unwrap(), (4, 2, "ab:c\n".to_owned()));
        assert_eq!(parse_edit("0:0:").unwrap(), (0, 0, String::new()));
        assert!(parse_edit("4:x").is_err());
        assert!(parse_edit("a:1:b").is_err());
    }

    #[test]
    fn positions_are_one_based() {
        let src = b"ab\ncd\n";
        assert_eq!(line_column(src, 0), (1, 1));
        assert_eq!(line_column(src, 4), (2, 2));
        assert_eq!(line_column(src, 6), (3, 1));
    }

    #[test]
    fn bench_numbers_pick_a_readable_scale() {
        assert_eq!(format_duration(0.0025), "2.50 ms");
        assert_eq!(format_duration(3.0), "3.00 s");
        assert_eq!(format_duration(0.000_000_4), "400 ns");
        assert_eq!(format_throughput(3 * 1024 * 1024, 1.0), "3.00 MiB/s");
        assert_eq!(format_throughput(512, 0.5), "1.00 KiB/s");
        assert_eq!(format_throughput(100, 1.0), "100 B/s");
    }
}
