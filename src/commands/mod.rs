
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::info;

use crate::gemini::{Blob, Client, Content, Part};
use crate::pipeline::{self, AttachSpec, PipelineOptions, Source};
use crate::search;
use crate::store::Store;
use crate::table;
use crate::vector;
use crate::{GenaiError, Result};

/// Output renderings for a single embedding vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EmbedFormat {
    /// JSON array of floats.
    Json,
    /// Standard base64 of the binary encoding.
    Base64,
    /// The raw binary encoding.
    Blob,
}

#[derive(Debug, Clone)]
pub struct EmbedDbOptions {
    pub table: String,
    pub batch_size: usize,
    pub sql: Option<String>,
    pub attach: Vec<String>,
    pub files: Vec<String>,
    pub files_list: Vec<String>,
    pub store_content: bool,
    pub metadata: Option<String>,
    pub prefix: Option<String>,
}

/// Send a prompt built from the given parts and print the response.
#[inline]
pub fn run_prompt(
    client: &Client,
    args: &[String],
    system: Option<&str>,
    stream: bool,
    temperature: Option<f32>,
) -> Result<()> {
    let mut parts = Vec::with_capacity(args.len());
    let mut seen_stdin = false;
    for arg in args {
        if arg == "-" {
            if seen_stdin {
                return Err(GenaiError::Config(
                    "expect a single '-' in the list of prompt parts".to_string(),
                ));
            }
            seen_stdin = true;

            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            parts.push(Part::text(buf));
        } else if looks_like_url(arg) {
            parts.push(part_from_url(arg)?);
        } else if looks_like_filename(arg) {
            parts.push(part_from_file(Path::new(arg))?);
        } else {
            parts.push(Part::text(arg));
        }
    }

    let contents = vec![Content::user(parts)];

    if stream {
        let mut wrote = false;
        client.generate_stream(&contents, system, temperature, |text| {
            wrote = true;
            print!("{text}");
            let _ = std::io::stdout().flush();
        })?;
        if !wrote {
            print!("<empty response from model>");
        }
        println!();
    } else {
        let response = client.generate(&contents, system, temperature)?;
        if response.is_empty() {
            println!("<empty response from model>");
        } else {
            println!("{response}");
        }
    }

    Ok(())
}

/// Interactive terminal chat. The full history is resent on every turn.
#[inline]
pub fn run_chat(client: &Client) -> Result<()> {
    println!("Type 'exit' or 'quit' to exit");

    let stdin = std::io::stdin();
    let mut history: Vec<Content> = Vec::new();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "exit" || text == "quit" {
            break;
        }

        history.push(Content::user(vec![Part::text(text)]));

        let mut reply = String::new();
        client.generate_stream(&history, None, None, |fragment| {
            print!("{fragment}");
            let _ = std::io::stdout().flush();
            reply.push_str(fragment);
        })?;
        println!();

        history.push(Content::model(vec![Part::text(reply)]));
    }

    Ok(())
}

/// Count the tokens in the given content and print the total.
#[inline]
pub fn run_counttok(client: &Client, content: &str) -> Result<()> {
    let content = read_content_arg(content)?;
    let contents = vec![Content::user(vec![Part::text(content)])];
    let total = client.count_tokens(&contents)?;
    println!("{total}");
    Ok(())
}

/// List the models the service supports.
#[inline]
pub fn run_models(client: &Client) -> Result<()> {
    let models = client.list_models()?;

    println!(
        "{:<40} {:<12} {:>9} {:>9}  Description",
        "Name", "Version", "Max In", "Max Out"
    );
    for model in models {
        println!(
            "{:<40} {:<12} {:>9} {:>9}  {}",
            model.name,
            model.version,
            model.input_token_limit.map_or_else(|| "-".to_string(), |n| n.to_string()),
            model.output_token_limit.map_or_else(|| "-".to_string(), |n| n.to_string()),
            model.description
        );
    }
    Ok(())
}

/// Embed a single piece of content and emit it to stdout.
#[inline]
pub fn embed_content(client: &Client, content: &str, format: EmbedFormat) -> Result<()> {
    let content = read_content_arg(content)?;
    let embedding = client.embed_content(&content)?;

    let mut stdout = std::io::stdout().lock();
    match format {
        EmbedFormat::Json => {
            let json = serde_json::to_string(&embedding)
                .map_err(|e| GenaiError::Parse(format!("failed to encode embedding: {e}")))?;
            writeln!(stdout, "{json}")?;
        }
        EmbedFormat::Base64 => {
            writeln!(stdout, "{}", BASE64.encode(vector::encode(&embedding)))?;
        }
        EmbedFormat::Blob => {
            stdout.write_all(&vector::encode(&embedding))?;
        }
    }
    Ok(())
}

/// Embed multiple inputs and persist the vectors into a SQLite store.
#[inline]
pub async fn embed_db(
    client: &Client,
    db_path: &Path,
    input: Option<&str>,
    options: EmbedDbOptions,
) -> Result<()> {
    let source = build_source(&options, input)?;

    let pipeline_options = PipelineOptions {
        table: options.table,
        batch_size: options.batch_size,
        store_content: options.store_content,
        metadata: options.metadata,
        id_prefix: options.prefix,
    };

    let store = Store::open(db_path).await?;
    let result = pipeline::run(&store, client, source, &pipeline_options).await;
    store.close().await;

    let written = result?;
    info!(
        "Embedded {} rows into table {} of {}",
        written,
        pipeline_options.table,
        db_path.display()
    );
    Ok(())
}

/// Embed the query content, then print the stored entries most similar to
/// it, one JSON object per line.
#[inline]
pub async fn embed_similar(
    client: &Client,
    db_path: &Path,
    content: &str,
    table: &str,
    topk: usize,
    show: &[String],
) -> Result<()> {
    let content = read_content_arg(content)?;
    let query = client.embed_content(&content)?;

    let store = Store::open(db_path).await?;
    let result = search::find_similar(&store, table, &query, topk).await;
    store.close().await;

    let mut stdout = std::io::stdout().lock();
    for entry in result? {
        let display = search::project(&entry, show)?;
        let json = serde_json::to_string(&display)
            .map_err(|e| GenaiError::Parse(format!("failed to encode entry: {e}")))?;
        writeln!(stdout, "{json}")?;
    }
    Ok(())
}

/// Resolve the mutually exclusive `embed db` input modes into a pipeline
/// source.
fn build_source(options: &EmbedDbOptions, input: Option<&str>) -> Result<Source> {
    let sql_mode = options.sql.is_some();
    let files_mode = !options.files.is_empty() || !options.files_list.is_empty();

    if sql_mode && files_mode {
        return Err(GenaiError::Config(
            "--files/--files-list are mutually exclusive with --sql".to_string(),
        ));
    }
    if !options.files.is_empty() && !options.files_list.is_empty() {
        return Err(GenaiError::Config(
            "expect only one of --files and --files-list".to_string(),
        ));
    }

    if let Some(query) = &options.sql {
        let attach = if options.attach.is_empty() {
            None
        } else {
            let [alias, path] = options.attach.as_slice() else {
                return Err(GenaiError::Config(
                    "expect an <alias>,<db path> pair for --attach".to_string(),
                ));
            };
            Some(AttachSpec {
                alias: alias.clone(),
                path: PathBuf::from(path),
            })
        };
        return Ok(Source::Sql {
            query: query.clone(),
            attach,
        });
    }

    if !options.files.is_empty() {
        let [root, pattern] = options.files.as_slice() else {
            return Err(GenaiError::Config(
                "expect a <root dir>,<glob> pair for --files".to_string(),
            ));
        };
        return Ok(Source::FileTree {
            root: PathBuf::from(root),
            pattern: pattern.clone(),
        });
    }

    if !options.files_list.is_empty() {
        return Ok(Source::FileList(
            options.files_list.iter().map(PathBuf::from).collect(),
        ));
    }

    let Some(input) = input else {
        return Err(GenaiError::Config(
            "when --sql or --files* is not passed, expect a filename or '-' as the input argument"
                .to_string(),
        ));
    };

    let (_, loaded) = if input == "-" {
        table::load_table(std::io::stdin().lock(), None)?
    } else {
        let file = std::fs::File::open(input)
            .map_err(|e| GenaiError::Config(format!("unable to open {input}: {e}")))?;
        table::load_table(file, None)?
    };
    Ok(Source::Table(loaded))
}

fn read_content_arg(content: &str) -> Result<String> {
    if content == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(content.to_string())
    }
}

/// An argument is treated as a filename when it has an alphabetic extension
/// and does not look like a URL.
fn looks_like_filename(arg: &str) -> bool {
    if arg.contains("://") {
        return false;
    }
    Path::new(arg)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphabetic()))
}

fn looks_like_url(arg: &str) -> bool {
    url::Url::parse(arg).is_ok_and(|url| url.host().is_some())
}

fn part_from_file(path: &Path) -> Result<Part> {
    let bytes = std::fs::read(path)
        .map_err(|e| GenaiError::Config(format!("unable to read {}: {e}", path.display())))?;

    let mime = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(image_mime_for_extension);

    match mime {
        Some(mime) => Ok(Part::InlineData(Blob {
            mime_type: mime.to_string(),
            data: BASE64.encode(&bytes),
        })),
        // Anything that is not a known image format is sent as text.
        None => Ok(Part::text(String::from_utf8_lossy(&bytes).into_owned())),
    }
}

fn part_from_url(arg: &str) -> Result<Part> {
    let mut response = ureq::get(arg)
        .call()
        .map_err(|e| GenaiError::Service(format!("failed to fetch {arg}: {e}")))?;

    let content_type = response
        .headers()
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let bytes = response
        .body_mut()
        .read_to_vec()
        .map_err(|e| GenaiError::Service(format!("failed to read {arg}: {e}")))?;

    if content_type.starts_with("image/") {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or(&content_type)
            .trim()
            .to_string();
        Ok(Part::InlineData(Blob {
            mime_type: mime,
            data: BASE64.encode(&bytes),
        }))
    } else {
        Ok(Part::text(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

fn image_mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}
