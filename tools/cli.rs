use std::fs;
use std::path::PathBuf;

use clap::Parser;
use vernice::{GrammarOptions, RawGrammar, RawTheme, Registry, Theme};

#[derive(Parser, Debug)]
#[command(name = "vernice-cli")]
#[command(about = "Tokenizes a file with a TextMate grammar and prints the scopes of each token")]
#[command(version)]
struct Cli {
    /// JSON grammar to tokenize with. Repeat it to make the grammars it includes available,
    /// the first one is used.
    #[arg(long, required = true)]
    grammar: Vec<PathBuf>,
    /// JSON theme (VS Code or tmTheme layout) used to show the style of each token
    #[arg(long)]
    theme: Option<PathBuf>,
    /// Start every line with the grammar scope name
    #[arg(long)]
    root_scope: bool,
    /// File to tokenize
    file: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut registry = Registry::new(GrammarOptions::default().root_scope(cli.root_scope));
    let mut main_scope = None;
    for path in &cli.grammar {
        let raw = RawGrammar::load_from_file(path)?;
        main_scope.get_or_insert_with(|| raw.scope_name.clone());
        registry.add_grammar(raw);
    }
    let Some(main_scope) = main_scope else {
        return Err("no grammar given".into());
    };

    let theme = match &cli.theme {
        Some(path) => Some(Theme::from_raw(&RawTheme::load_from_file(path)?)?),
        None => None,
    };

    let grammar = registry.grammar(&main_scope)?;
    let content = fs::read_to_string(&cli.file)?;
    let mut state = grammar.initial_state();

    for (line_idx, line) in content.lines().enumerate() {
        let (tokens, next) = grammar.tokenize_line(line, &state)?;
        state = next;

        for token in tokens {
            print!(
                "{}:{}-{} {:?} {}",
                line_idx + 1,
                token.span.start,
                token.span.end,
                &line[token.span.clone()],
                token.scopes.join(" ")
            );
            if let Some(theme) = &theme {
                let style = theme.style(theme.match_scope_path(&token.scopes));
                print!(
                    " [{} on {}, {}]",
                    style.foreground.as_hex(),
                    style.background.as_hex(),
                    style.font_style
                );
            }
            println!();
        }
    }

    Ok(())
}
