use std::path::PathBuf;

use clap::{Parser, Subcommand};
use genai_cli::Result;
use genai_cli::commands::{
    self, EmbedDbOptions, EmbedFormat, embed_content, embed_db, embed_similar,
};
use genai_cli::config::{Config, resolve_api_key};
use genai_cli::gemini::Client;

#[derive(Parser, Debug)]
#[command(name = "genai-cli")]
#[command(about = "Interact with Google's Gemini models from the command line")]
#[command(version)]
struct Cli {
    /// API key for the generative language service
    #[arg(long, global = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a prompt to a model
    #[command(visible_aliases = ["p", "ask"])]
    Prompt {
        /// Prompt parts: quoted text, an image file, a URL, or '-' to read
        /// one part from standard input
        #[arg(required = true)]
        parts: Vec<String>,
        /// Set a system prompt
        #[arg(long, short = 's')]
        system: Option<String>,
        /// Stream the response from the model
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        stream: bool,
        /// Temperature setting for the model
        #[arg(long)]
        temp: Option<f32>,
        /// Name of the model to use
        #[arg(long, short = 'm')]
        model: Option<String>,
    },
    /// Interactive chat with a model
    Chat {
        /// Name of the model to use
        #[arg(long, short = 'm')]
        model: Option<String>,
    },
    /// Count tokens in content
    #[command(name = "counttok", visible_alias = "tokcount")]
    Counttok {
        /// Content to count, or '-' to read from standard input
        content: String,
        /// Name of the model to use
        #[arg(long, short = 'm')]
        model: Option<String>,
    },
    /// List supported models
    Models,
    /// Embed content using an embedding model
    #[command(subcommand)]
    Embed(EmbedCommands),
}

#[derive(Subcommand, Debug)]
enum EmbedCommands {
    /// Embed a single input and emit the result to stdout
    Content {
        /// Content to embed, or '-' to read from standard input
        content: String,
        /// Format for the emitted embedding
        #[arg(long, value_enum, default_value_t = EmbedFormat::Json)]
        format: EmbedFormat,
        /// Name of the embedding model to use
        #[arg(long, short = 'm')]
        model: Option<String>,
    },
    /// Embed multiple inputs, storing the results into a SQLite store
    Db {
        /// Path to the output store
        db_path: PathBuf,
        /// Input file or '-' for stdin; CSV, TSV, JSON or JSON-lines with an
        /// 'id' column (used when --sql and --files* are not given)
        input: Option<String>,
        /// Store table to write embeddings into
        #[arg(long, default_value = "embeddings")]
        table: String,
        /// Number of rows to send for embedding per service call (defaults
        /// to the configured batch size)
        #[arg(long)]
        batch_size: Option<usize>,
        /// SQL mode: a query whose first column is the id and whose other
        /// columns become the embedded text
        #[arg(long)]
        sql: Option<String>,
        /// Additional store to attach, as an <alias>,<filename> pair
        #[arg(long, value_delimiter = ',')]
        attach: Vec<String>,
        /// Files to embed, as a <root dir>,<glob> pair; the directory is
        /// traversed recursively picking files that match the glob
        #[arg(long, value_delimiter = ',', conflicts_with = "sql")]
        files: Vec<String>,
        /// Comma-separated list of files to embed
        #[arg(long, value_delimiter = ',', conflicts_with_all = ["sql", "files"])]
        files_list: Vec<String>,
        /// Also store the original content in the table ('content' column)
        #[arg(long)]
        store: bool,
        /// Also store this metadata with every row ('metadata' column)
        #[arg(long)]
        metadata: Option<String>,
        /// Prepend a prefix to the stored id of each row
        #[arg(long)]
        prefix: Option<String>,
        /// Name of the embedding model to use
        #[arg(long, short = 'm')]
        model: Option<String>,
    },
    /// Find the stored entries most similar to the given content
    Similar {
        /// Path to the store to search
        db_path: PathBuf,
        /// Content to compare against, or '-' to read from standard input
        content: String,
        /// Store table holding the embeddings
        #[arg(long, default_value = "embeddings")]
        table: String,
        /// How many most similar entries to return
        #[arg(long, default_value_t = 5)]
        topk: usize,
        /// Columns to emit for the most similar entries ('score' is computed)
        #[arg(long, value_delimiter = ',', default_value = "id,score")]
        show: Vec<String>,
        /// Name of the embedding model to use
        #[arg(long, short = 'm')]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let key = resolve_api_key(cli.key.as_deref())?;
    let client = Client::new(&config, key)?;

    match cli.command {
        Commands::Prompt {
            parts,
            system,
            stream,
            temp,
            model,
        } => {
            let client = override_model(client, model.as_deref());
            commands::run_prompt(&client, &parts, system.as_deref(), stream, temp)?;
        }
        Commands::Chat { model } => {
            let client = override_model(client, model.as_deref());
            commands::run_chat(&client)?;
        }
        Commands::Counttok { content, model } => {
            let client = override_model(client, model.as_deref());
            commands::run_counttok(&client, &content)?;
        }
        Commands::Models => {
            commands::run_models(&client)?;
        }
        Commands::Embed(embed) => match embed {
            EmbedCommands::Content {
                content,
                format,
                model,
            } => {
                let client = override_embedding_model(client, model.as_deref());
                embed_content(&client, &content, format)?;
            }
            EmbedCommands::Db {
                db_path,
                input,
                table,
                batch_size,
                sql,
                attach,
                files,
                files_list,
                store,
                metadata,
                prefix,
                model,
            } => {
                let client = override_embedding_model(client, model.as_deref());
                let options = EmbedDbOptions {
                    table,
                    batch_size: batch_size.unwrap_or(config.api.batch_size as usize),
                    sql,
                    attach,
                    files,
                    files_list,
                    store_content: store,
                    metadata,
                    prefix,
                };
                embed_db(&client, &db_path, input.as_deref(), options).await?;
            }
            EmbedCommands::Similar {
                db_path,
                content,
                table,
                topk,
                show,
                model,
            } => {
                let client = override_embedding_model(client, model.as_deref());
                embed_similar(&client, &db_path, &content, &table, topk, &show).await?;
            }
        },
    }

    Ok(())
}

fn override_model(client: Client, model: Option<&str>) -> Client {
    match model {
        Some(model) => client.with_model(model),
        None => client,
    }
}

fn override_embedding_model(client: Client, model: Option<&str>) -> Client {
    match model {
        Some(model) => client.with_embedding_model(model),
        None => client,
    }
}
