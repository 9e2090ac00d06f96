use std::{
    io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};

use clap::{CommandFactory, Parser as ClapParser, ValueEnum, error::ErrorKind};
use colored::Colorize;
use itertools::Itertools;
use log::{debug, info};

use crate::{
    backend::{
        CodegenOptions,
        targets::{CodeGenerator, Target},
    },
    frontend::{
        Diagnostic, SourceFile, SourceFileOrigin, parser::Parser, resolve::Resolver,
        type_check::TypeChecker,
    },
    middle::{
        ir::{self, dot::function_to_dot, lowering::lower_to_ir, pretty_print::plain},
        optimization::{PassKind, PassManager},
        symbol::SymbolTable,
    },
};

mod backend;
mod frontend;
mod index;
mod middle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Emit {
    /// Optimized IR listing
    Ir,
    /// One Graphviz graph per function
    Dot,
    /// x86-64 assembly for the GNU assembler
    #[default]
    Asm,
    /// Assembled and linked executable
    Exe,
}

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    source_file: PathBuf,

    /// Output file, derived from the source file name by default
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t)]
    emit: Emit,

    /// Comma separated optimization passes, run in the given order
    #[arg(long, value_delimiter = ',', conflicts_with = "optimization_level")]
    passes: Option<Vec<PassKind>>,

    /// `-O0` disables every optimization pass
    #[arg(short = 'O', default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=1))]
    optimization_level: u8,

    /// Annotate the generated assembly with each variable's location
    #[arg(long)]
    debug_info: bool,
}

impl Args {
    fn output_path(&self) -> PathBuf {
        if let Some(output) = &self.output {
            return output.clone();
        }

        let extension = match self.emit {
            Emit::Ir => "ir",
            Emit::Dot => "dot",
            Emit::Asm => "s",
            Emit::Exe => "",
        };

        self.source_file.with_extension(extension)
    }

    fn pass_manager(&self) -> PassManager {
        match (&self.passes, self.optimization_level) {
            (Some(passes), _) => PassManager::new(passes.iter().copied()),
            (None, 0) => PassManager::new([]),
            (None, _) => PassManager::with_default_passes(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("could not read `{}`: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("could not write `{}`: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("could not create a temporary file: {0}")]
    TemporaryFile(io::Error),
    /// Already rendered against its source file
    #[error("{0}")]
    Diagnostic(String),
    #[error("could not run `{tool}`: {source}")]
    Spawn { tool: String, source: io::Error },
    #[error("`{tool}` failed with {status}")]
    Tool { tool: String, status: ExitStatus },
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    if !args.source_file.is_file() {
        Args::command()
            .error(
                ErrorKind::InvalidValue,
                format!("Source file '{}' does not exist!", args.source_file.display()),
            )
            .exit()
    }

    if let Err(error) = compile(&args) {
        match error {
            CompileError::Diagnostic(rendered) => eprintln!("{rendered}"),
            error => eprintln!("{}: {}", "error".red().bold(), error.to_string().red()),
        }

        std::process::exit(1);
    }
}

fn compile(args: &Args) -> Result<(), CompileError> {
    let contents = std::fs::read_to_string(&args.source_file).map_err(|source| {
        CompileError::Read {
            path: args.source_file.clone(),
            source,
        }
    })?;

    let source_file = SourceFile {
        contents,
        origin: SourceFileOrigin::File(args.source_file.clone()),
    };

    let mut module = analyze(&source_file)
        .map_err(|diagnostic| CompileError::Diagnostic(diagnostic.render(&source_file)))?;

    let mut passes = args.pass_manager();
    if passes.is_empty() {
        info!("optimizations disabled");
    } else {
        passes.run(&mut module);
    }

    let output = args.output_path();
    let generator = Target::x86_64LinuxGnu.get_code_generator();
    let options = CodegenOptions {
        emit_debug_info: args.debug_info,
    };

    match args.emit {
        Emit::Ir => write_output(&output, plain(&module)),
        Emit::Dot => write_output(
            &output,
            module.functions.iter().map(function_to_dot).join("\n"),
        ),
        Emit::Asm => write_output(&output, generator.translate_to_asm(&module, &options)),
        Emit::Exe => {
            let asm = generator.translate_to_asm(&module, &options);
            build_executable(&generator, &asm, &output)
        }
    }
}

/// Runs the front end and lowers the checked program to IR
fn analyze(source_file: &SourceFile) -> Result<ir::Module, Diagnostic> {
    let mut program = Parser::parse_program(source_file)?;
    let mut symbols = SymbolTable::new();

    Resolver::resolve_names(&mut program, &mut symbols)?;
    TypeChecker::check_program(&mut program, &mut symbols)?;
    TypeChecker::check_entry_point(&program)?;

    debug!("checked {} functions", program.functions.len());

    Ok(lower_to_ir(&program, symbols))
}

fn write_output(path: &Path, contents: String) -> Result<(), CompileError> {
    debug!("writing {}", path.display());

    std::fs::write(path, contents).map_err(|source| CompileError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn build_executable(
    generator: &impl CodeGenerator,
    asm: &str,
    output: &Path,
) -> Result<(), CompileError> {
    let asm_file = mktemp::Temp::new_file().map_err(CompileError::TemporaryFile)?;
    let object_file = mktemp::Temp::new_file().map_err(CompileError::TemporaryFile)?;

    write_output(asm_file.as_path(), asm.to_owned())?;

    run_tool(generator.create_assembler_command(asm_file.as_path(), object_file.as_path()))?;
    run_tool(generator.create_linker_command(object_file.as_path(), output))
}

fn run_tool(mut command: Command) -> Result<(), CompileError> {
    let tool = command.get_program().to_string_lossy().into_owned();

    debug!(
        "running {tool} {}",
        command.get_args().map(|arg| arg.to_string_lossy()).join(" ")
    );

    let status = command
        .status()
        .map_err(|source| CompileError::Spawn {
            tool: tool.clone(),
            source,
        })?;

    if !status.success() {
        return Err(CompileError::Tool { tool, status });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(arguments: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("cinderc").chain(arguments.iter().copied())).unwrap()
    }

    #[test]
    fn command_line_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn output_path_follows_the_emitted_artifact() {
        assert_eq!(parse(&["prog.cn"]).output_path(), PathBuf::from("prog.s"));
        assert_eq!(
            parse(&["dir/prog.cn", "--emit", "ir"]).output_path(),
            PathBuf::from("dir/prog.ir")
        );
        assert_eq!(
            parse(&["prog.cn", "--emit", "exe"]).output_path(),
            PathBuf::from("prog")
        );
        assert_eq!(
            parse(&["prog.cn", "--emit", "dot", "-o", "graph.gv"]).output_path(),
            PathBuf::from("graph.gv")
        );
    }

    #[test]
    fn pass_selection() {
        assert!(parse(&["prog.cn", "-O0"]).pass_manager().is_empty());
        assert!(!parse(&["prog.cn"]).pass_manager().is_empty());

        let args = parse(&["prog.cn", "--passes", "constant-folding,dead-code-elimination"]);
        assert_eq!(
            args.passes,
            Some(vec![PassKind::ConstantFolding, PassKind::DeadCodeElimination])
        );

        assert!(Args::try_parse_from(["cinderc", "prog.cn", "--passes", "inline"]).is_err());
        assert!(Args::try_parse_from(["cinderc", "prog.cn", "-O2"]).is_err());
    }

    #[test]
    fn diagnostics_point_at_the_source() {
        let source = SourceFile::from_memory(indoc! {"
            fun main() @s32:
                return missing
        "});

        let diagnostic = analyze(&source).unwrap_err();
        let rendered = strip_ansi_escapes::strip_str(diagnostic.render(&source));

        assert!(rendered.contains("<memory>:2:"), "{rendered}");
    }

    #[test]
    fn programs_need_a_main_function() {
        let source = SourceFile::from_memory(indoc! {"
            fun helper() @s32:
                return 1
        "});

        let diagnostic = analyze(&source).unwrap_err();
        assert_eq!(diagnostic.message, "program has no `main` function");
    }

        #[test]
    fn writes_optimized_ir() {
        let directory = mktemp::Temp::new_dir().unwrap();
        let source_file = directory.as_path().join("answer.cn");
        std::fs::write(
            &source_file,
            indoc! {"
                fun main() @s32:
                    return 6 * 7
            "},
        )
        .unwrap();

        let args = parse(&[source_file.to_str().unwrap(), "--emit", "ir"]);
        compile(&args).unwrap();

        let ir = std::fs::read_to_string(directory.as_path().join("answer.ir")).unwrap();
        assert!(ir.contains("store @s32 $ret, 42"), "{ir}");
    }
}
