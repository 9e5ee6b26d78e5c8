use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sitecanvas_cli::api::{ThemeApi, ThemeBackend};
use sitecanvas_cli::config_loader::load_config;
use sitecanvas_cli::preview::{PreviewOpts, run_preview, spawn_preview};
use sitecanvas_cli::workflow::{LoadOptions, LoadOrigin, LoadRequest, LoadedTheme, load_theme, save_theme};
use sitecanvas_core::bridge::ApplyOptions;
use sitecanvas_core::clock::{Clock, SystemClock};
use sitecanvas_core::config::BuilderConfig;
use sitecanvas_core::editor::MemoryEditor;
use sitecanvas_core::error::PageError;
use sitecanvas_core::export::export_collection;
use sitecanvas_core::installed::{InstalledSource, import_installed_theme};
use sitecanvas_core::model::{PageCollection, ThemeIdentity};
use sitecanvas_core::preview::render_preview;
use sitecanvas_core::saved::pages_from_stored_html;
use sitecanvas_core::session::EditorSession;
use sitecanvas_store::notes::{NotesAutosave, load_notes, new_note};
use sitecanvas_store::{PersistOptions, SqliteStore, ThemePersistence, WriteOutcome};

#[derive(Debug, Parser)]
#[command(name = "sitecanvas")]
struct Cli {
    #[arg(long = "source-dir", short = 's', global = true)]
    source_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "ID")]
    theme: Option<String>,
    /// Installed theme as OWNER/THEME; a bare THEME uses `api.owner_id`.
    #[arg(long, global = true, value_name = "[OWNER/]THEME")]
    installed: Option<String>,
    #[arg(long, global = true)]
    cache_bust: Option<String>,
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Load the theme and show where its pages came from.")]
    Load,
    #[command(about = "Export the pages and upload them to the theme API.")]
    Save {
        #[arg(long)]
        name: Option<String>,
    },
    #[command(about = "Write the standalone export document.")]
    Export {
        #[arg(long, value_name = "PATH", default_value = "export.html")]
        out: PathBuf,
        #[arg(long, value_name = "PATH")]
        css_out: Option<PathBuf>,
    },
    #[command(about = "Read a previously exported document into local storage.")]
    ImportSaved { file: PathBuf },
    #[command(about = "Reconstruct pages from an installed theme bundle.")]
    ImportInstalled {
        #[arg(value_name = "[OWNER/]THEME")]
        theme: String,
    },
    Pages {
        #[command(subcommand)]
        command: PagesCommand,
    },
    Notes {
        #[command(subcommand)]
        command: NotesCommand,
    },
    #[command(about = "Serve the export document locally.")]
    Preview {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long)]
        no_open: bool,
    },
    #[command(about = "Follow page changes written by other processes.")]
    Watch {
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        #[arg(long)]
        preview: bool,
        #[arg(long, default_value = "127.0.0.1", requires = "preview")]
        preview_host: String,
        #[arg(long, default_value_t = 8080, requires = "preview")]
        preview_port: u16,
        #[arg(long, requires = "preview")]
        preview_no_open: bool,
    },
}

#[derive(Debug, Subcommand)]
enum PagesCommand {
    List,
    Add,
    Rename { page_id: String, name: String },
    Delete { page_id: String },
    Switch { page_id: String },
    #[command(about = "List page links whose target page does not exist.")]
    Links,
}

#[derive(Debug, Subcommand)]
enum NotesCommand {
    List,
    Add { content: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match &cli.command {
        Command::Load => run_load(&cli),
        Command::Save { name } => run_save(&cli, name.as_deref()),
        Command::Export { out, css_out } => run_export(&cli, out, css_out.as_ref()),
        Command::ImportSaved { file } => run_import_saved(&cli, file),
        Command::ImportInstalled { theme } => run_import_installed(&cli, theme),
        Command::Pages { command } => run_pages(&cli, command),
        Command::Notes { command } => run_notes(&cli, command),
        Command::Preview {
            host,
            port,
            no_open,
        } => run_preview_command(&cli, host, *port, *no_open),
        Command::Watch {
            interval_ms,
            preview,
            preview_host,
            preview_port,
            preview_no_open,
        } => run_watch(
            &cli,
            *interval_ms,
            preview.then(|| PreviewOpts {
                host: preview_host.clone(),
                port: *preview_port,
                no_open: *preview_no_open,
            }),
        ),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

struct Workspace {
    config: BuilderConfig,
    api: ThemeApi,
}

impl Workspace {
    fn open(cli: &Cli) -> Result<Self> {
        let root = root_dir(cli)?;
        let config = load_config(&root, cli.config.as_deref())?;
        let api = ThemeApi::new(&config.api);
        Ok(Self { config, api })
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let path = &self.config.storage.path;
        let store = SqliteStore::open(path)
            .with_context(|| format!("failed to open local storage at {}", path.display()))?;
        Ok(store.with_quota(self.config.storage.quota_bytes))
    }

    fn load(&self, cli: &Cli) -> Result<LoadedTheme<SqliteStore>> {
        let request = load_request(cli, self.default_owner())?;
        let loaded = load_theme(
            &self.api,
            &request,
            self.open_store()?,
            &LoadOptions::from(&self.config),
        );
        if let Some(id) = &loaded.rejected_id {
            eprintln!("warning: theme id '{id}' is malformed; it was ignored and its local data cleared");
        }
        for path in &loaded.skipped_paths {
            eprintln!("warning: page '{path}' could not be fetched and was skipped");
        }
        Ok(loaded)
    }

    fn default_owner(&self) -> Option<&str> {
        self.config.api.owner_id.as_deref()
    }

    fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            retry_delays: self.config.editor.retry_delays.clone(),
            script_timeout: self.config.editor.script_timeout,
        }
    }
}

fn root_dir(cli: &Cli) -> Result<PathBuf> {
    match &cli.source_dir {
        Some(path) => {
            if path.is_absolute() {
                Ok(path.clone())
            } else {
                let cwd = std::env::current_dir().context("failed to read current directory")?;
                Ok(cwd.join(path))
            }
        }
        None => std::env::current_dir().context("failed to read current directory"),
    }
}

fn load_request(cli: &Cli, default_owner: Option<&str>) -> Result<LoadRequest> {
    let installed = match &cli.installed {
        Some(value) => Some(parse_installed(value, default_owner)?),
        None => None,
    };
    Ok(LoadRequest {
        theme_id: cli.theme.clone(),
        installed,
        cache_bust: cli.cache_bust.clone(),
    })
}

fn parse_installed(value: &str, default_owner: Option<&str>) -> Result<(String, String)> {
    let (owner, theme) = match value.split_once('/') {
        Some((owner, theme)) => (owner.trim(), theme.trim()),
        None => match default_owner {
            Some(owner) => (owner.trim(), value.trim()),
            None => bail!("'{value}' has no owner; use OWNER/THEME or set api.owner_id"),
        },
    };
    if owner.is_empty() || theme.is_empty() {
        bail!("installed theme expects [OWNER/]THEME, got '{value}'");
    }
    Ok((owner.to_string(), theme.to_string()))
}

/// Identity for commands that only touch local storage.
fn local_identity(cli: &Cli, default_owner: Option<&str>) -> Result<ThemeIdentity> {
    if let Some(id) = &cli.theme {
        return ThemeIdentity::custom(id)
            .with_context(|| format!("theme id '{id}' is malformed"));
    }
    if let Some(value) = &cli.installed {
        let (owner, theme) = parse_installed(value, default_owner)?;
        return ThemeIdentity::installed(&owner, &theme)
            .with_context(|| format!("installed theme '{value}' is malformed"));
    }
    bail!("this command needs --theme ID or --installed OWNER/THEME")
}

fn origin_label(origin: LoadOrigin) -> &'static str {
    match origin {
        LoadOrigin::Custom => "custom",
        LoadOrigin::Installed => "installed",
        LoadOrigin::New => "new",
    }
}

fn print_pages(collection: &PageCollection) {
    for page in &collection.pages {
        let marker = if page.id == collection.current_page_id { "*" } else { " " };
        println!("{marker} {}\t{}", page.id, page.name);
    }
}

fn persist(persistence: &mut ThemePersistence<SqliteStore>, collection: &PageCollection) {
    match persistence.flush(collection, SystemClock.now_millis()) {
        WriteOutcome::Written | WriteOutcome::Unchanged => {}
        WriteOutcome::WrittenTruncated => {
            eprintln!("warning: local storage is full; page styles were truncated in the local copy")
        }
        WriteOutcome::Skipped => {
            eprintln!("warning: the theme has no id yet; run `sitecanvas save` to keep these changes")
        }
        WriteOutcome::Failed => eprintln!("warning: could not write the local copy of the pages"),
    }
}

fn run_load(cli: &Cli) -> Result<()> {
    let workspace = Workspace::open(cli)?;
    let loaded = workspace.load(cli)?;
    println!("theme: {}", loaded.name);
    println!("origin: {}", origin_label(loaded.origin));
    println!("restored_from_local: {}", loaded.restored_from_local());
    println!("pages: {}", loaded.collection.len());
    print_pages(&loaded.collection);
    Ok(())
}

fn run_save(cli: &Cli, name: Option<&str>) -> Result<()> {
    let workspace = Workspace::open(cli)?;
    let loaded = workspace.load(cli)?;
    let name = name.unwrap_or(&loaded.name);
    let saved = save_theme(&workspace.api, loaded.identity.as_ref(), name, &loaded.collection)?;
    if saved.created {
        println!("created theme {}", saved.id);
        println!("use --theme {} from now on", saved.id);
    } else {
        println!("saved theme {}", saved.id);
    }
    Ok(())
}

fn run_export(cli: &Cli, out: &Path, css_out: Option<&PathBuf>) -> Result<()> {
    let workspace = Workspace::open(cli)?;
    let loaded = workspace.load(cli)?;
    let (html, css) = export_collection(&loaded.collection, &loaded.name)?;
    fs::write(out, html).with_context(|| format!("failed to write {}", out.display()))?;
    println!("wrote {}", out.display());
    if let Some(path) = css_out {
        fs::write(path, css).with_context(|| format!("failed to write {}", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn run_import_saved(cli: &Cli, file: &Path) -> Result<()> {
    let workspace = Workspace::open(cli)?;
    let identity = local_identity(cli, workspace.default_owner())?;
    let html = fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let collection = pages_from_stored_html(&html, "");
    let mut persistence = ThemePersistence::new(
        workspace.open_store()?,
        Some(&identity),
        PersistOptions::from(&workspace.config.storage),
    );
    persistence.mount();
    persist(&mut persistence, &collection);
    println!("pages: {}", collection.len());
    print_pages(&collection);
    Ok(())
}

fn run_import_installed(cli: &Cli, theme: &str) -> Result<()> {
    let workspace = Workspace::open(cli)?;
    let (owner_id, theme_id) = parse_installed(theme, workspace.default_owner())?;
    let identity = ThemeIdentity::installed(&owner_id, &theme_id)
        .with_context(|| format!("installed theme '{owner_id}/{theme_id}' is malformed"))?;
    let mut source = InstalledSource::new(&workspace.api.installed_base_url(&owner_id, &theme_id))?;
    if let Some(token) = &cli.cache_bust {
        source = source.with_cache_bust(token.clone());
    }
    let options = LoadOptions::from(&workspace.config);
    let import = import_installed_theme(&workspace.api, &source, &options.import)?;
    for path in &import.skipped_paths {
        eprintln!("warning: page '{path}' could not be fetched and was skipped");
    }
    let mut persistence = ThemePersistence::new(workspace.open_store()?, Some(&identity), options.persist);
    persistence.mount();
    persist(&mut persistence, &import.collection);
    println!("pages: {}", import.collection.len());
    println!("scripts: {}", import.scripts.len());
    println!("css_bytes: {}", import.combined_css.len());
    print_pages(&import.collection);
    Ok(())
}

fn run_pages(cli: &Cli, command: &PagesCommand) -> Result<()> {
    let workspace = Workspace::open(cli)?;
    let loaded = workspace.load(cli)?;
    if matches!(command, PagesCommand::List) {
        print_pages(&loaded.collection);
        return Ok(());
    }

    let LoadedTheme {
        collection,
        context,
        mut persistence,
        ..
    } = loaded;
    let mut session = EditorSession::create(
        MemoryEditor::new(),
        collection,
        context,
        workspace.apply_options(),
        Box::new(SystemClock),
    );
    match command {
        PagesCommand::List => {}
        PagesCommand::Add => {
            let id = session.add_page()?;
            println!("added {id}");
        }
        PagesCommand::Rename { page_id, name } => session.rename_page(page_id, name)?,
        PagesCommand::Delete { page_id } => match session.delete_page(page_id) {
            Ok(()) => println!("deleted {page_id}"),
            Err(PageError::LastPage) => {
                eprintln!("warning: {}", PageError::LastPage);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        },
        PagesCommand::Switch { page_id } => {
            session.switch_page(page_id)?;
        }
        PagesCommand::Links => {
            for link in session.dangling_page_links() {
                println!("{}\t-> {}", link.page_id, link.target);
            }
            return Ok(());
        }
    }
    session.commit_current_page()?;
    let (_, collection) = session.into_parts();
    persist(&mut persistence, &collection);
    print_pages(&collection);
    Ok(())
}

fn run_notes(cli: &Cli, command: &NotesCommand) -> Result<()> {
    let workspace = Workspace::open(cli)?;
    let identity = local_identity(cli, workspace.default_owner())?;
    let mut store = workspace.open_store()?;
    let mut notes = load_notes(&store, &identity)?;
    match command {
        NotesCommand::List => {
            for note in &notes {
                println!("{}\t{}", note.id, note.content);
            }
        }
        NotesCommand::Add { content } => {
            let now = SystemClock.now_millis();
            notes.push(new_note(content, now));
            let mut autosave = NotesAutosave::new(identity, workspace.config.storage.debounce);
            autosave.on_change(&notes, now);
            autosave.flush(&mut store)?;
            println!("notes: {}", notes.len());
        }
    }
    Ok(())
}

fn run_preview_command(cli: &Cli, host: &str, port: u16, no_open: bool) -> Result<()> {
    let workspace = Workspace::open(cli)?;
    let loaded = workspace.load(cli)?;
    let artifact = render_preview(&loaded.collection, &loaded.name)?;
    run_preview(
        PreviewOpts {
            host: host.to_string(),
            port,
            no_open,
        },
        artifact,
    )
}

fn run_watch(cli: &Cli, interval_ms: u64, preview: Option<PreviewOpts>) -> Result<()> {
    let workspace = Workspace::open(cli)?;
    let loaded = workspace.load(cli)?;
    let LoadedTheme {
        name,
        collection,
        mut persistence,
        ..
    } = loaded;
    if persistence.key().is_none() {
        bail!("watch needs a theme with an id (--theme or --installed)");
    }
    let handle = match preview {
        Some(opts) => {
            let handle = spawn_preview(opts, render_preview(&collection, &name)?)?;
            println!("Preview: {}", handle.url);
            Some(handle)
        }
        None => None,
    };
    println!("watching {} pages", collection.len());

    let clock = SystemClock;
    loop {
        clock.sleep(Duration::from_millis(interval_ms.max(50)));
        let Some(updated) = persistence.poll_external()? else {
            continue;
        };
        println!(
            "updated: {} pages, current {}",
            updated.len(),
            updated.current_page_id
        );
        if let Some(handle) = &handle {
            handle.artifact.replace(render_preview(&updated, &name)?);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("parse")
    }

    #[test]
    fn installed_flag_needs_owner_and_theme() {
        assert_eq!(
            parse_installed("acme/landing", None).expect("parse"),
            ("acme".to_string(), "landing".to_string())
        );
        assert!(parse_installed("acme", None).is_err());
        assert!(parse_installed("/landing", Some("acme")).is_err());
    }

    #[test]
    fn bare_installed_theme_uses_configured_owner() {
        assert_eq!(
            parse_installed("landing", Some("acme")).expect("parse"),
            ("acme".to_string(), "landing".to_string())
        );
        assert_eq!(
            parse_installed("other/landing", Some("acme")).expect("parse"),
            ("other".to_string(), "landing".to_string())
        );
        let cli = parse(&["sitecanvas", "--installed", "landing", "load"]);
        let request = load_request(&cli, Some("acme")).expect("request");
        assert_eq!(request.installed, Some(("acme".to_string(), "landing".to_string())));
        assert!(load_request(&cli, None).is_err());
        let cli = parse(&["sitecanvas", "import-installed", "landing"]);
        assert!(matches!(cli.command, Command::ImportInstalled { ref theme } if theme == "landing"));
    }

    #[test]
    fn local_identity_prefers_theme_id() {
        let cli = parse(&["sitecanvas", "--theme", "t1", "--installed", "o/t", "notes", "list"]);
        assert_eq!(local_identity(&cli, None).expect("identity"), ThemeIdentity::Custom { id: "t1".to_string() });
        let cli = parse(&["sitecanvas", "--theme", "../x", "notes", "list"]);
        assert!(local_identity(&cli, None).is_err());
        let cli = parse(&["sitecanvas", "notes", "list"]);
        assert!(local_identity(&cli, None).is_err());
    }

    #[test]
    fn watch_preview_flags_require_preview() {
        assert!(Cli::try_parse_from(["sitecanvas", "watch", "--preview-port", "9000"]).is_err());
        let cli = parse(&["sitecanvas", "watch", "--preview", "--preview-port", "9000"]);
        assert!(matches!(cli.command, Command::Watch { preview: true, preview_port: 9000, .. }));
    }

    #[test]
    fn source_dir_resolves_relative_path() {
        let cli = parse(&["sitecanvas", "-s", "sites/demo", "load"]);
        let root = root_dir(&cli).expect("root dir");
        let expected = std::env::current_dir().expect("cwd").join("sites/demo");
        assert_eq!(root, expected);
    }
}
