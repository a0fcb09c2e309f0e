//! Shell completions and man pages.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

use crate::Cli;

const BIN_NAME: &str = "docsync";

fn write_completions(shell: clap_complete::Shell, out: &mut impl Write) {
    clap_complete::generate(shell, &mut Cli::command(), BIN_NAME, out);
}

/// The top-level page followed by one page per subcommand, each paired with
/// its file name (`docsync.1`, `docsync-run.1`, ...).
fn man_pages() -> Vec<(String, Man)> {
    let cli = Cli::command();
    let mut pages: Vec<(String, Man)> = cli
        .get_subcommands()
        .filter(|sub| sub.get_name() != "help")
        .map(|sub| {
            let title = format!("{BIN_NAME}-{}", sub.get_name());
            (format!("{title}.1"), Man::new(sub.clone()).title(title))
        })
        .collect();
    pages.insert(0, (format!("{BIN_NAME}.1"), Man::new(cli)));
    pages
}

fn write_man_dir(dir: &Path) -> io::Result<usize> {
    std::fs::create_dir_all(dir)?;
    let pages = man_pages();
    let count = pages.len();
    for (file_name, page) in pages {
        let mut file = std::fs::File::create(dir.join(file_name))?;
        page.render(&mut file)?;
    }
    Ok(count)
}

pub(crate) fn handle_completions(
    shell: clap_complete::Shell,
) -> Result<(), Box<dyn std::error::Error>> {
    write_completions(shell, &mut io::stdout());
    Ok(())
}

/// Print the main page, or write every page into `output`.
pub(crate) fn handle_man(output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        Some(dir) => {
            let count = write_man_dir(&dir)?;
            println!("Generated {count} man pages in: {}", dir.display());
        }
        None => Man::new(Cli::command()).render(&mut io::stdout().lock())?,
    }
    Ok(())
}
