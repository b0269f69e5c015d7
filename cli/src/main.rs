#![warn(clippy::nursery, clippy::pedantic)]
#![deny(unsafe_code)]

// burnbin CLI client
// Copyright (C) 2024  The burnbin authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use atty::Stream;
use burnbin_common::{
    CreatePaste, Created, ErrorBody, ErrorCode, ExpiresIn, PasteView, API_ENDPOINT,
    PASSWORD_HEADER_NAME,
};
use clap::{Parser, Subcommand};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use rpassword::prompt_password;
use url::Url;

#[derive(Parser)]
#[command(version, about)]
struct Opts {
    /// The burnbin instance to talk to.
    #[arg(long, env = "BURNBIN_SERVER", default_value = "http://localhost:8080")]
    server: Url,
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Upload a paste and print its slug.
    Create {
        /// File to upload. Reads stdin if omitted.
        path: Option<PathBuf>,
        #[arg(short, long)]
        syntax: Option<String>,
        /// One of 1h, 1d, 1w or 1m.
        #[arg(short, long, default_value_t)]
        expires: ExpiresIn,
        /// Prompt for a password readers must supply.
        #[arg(short, long)]
        password: bool,
        /// Delete the paste after its first successful read.
        #[arg(short, long)]
        burn: bool,
    },
    /// Print a paste's content.
    Read { slug: String },
    /// Report a paste as abusive.
    Report { slug: String },
    /// Delete a paste.
    Delete { slug: String },
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    let api = Api::new(opts.server)?;

    match opts.action {
        Action::Create {
            path,
            syntax,
            expires,
            password,
            burn,
        } => handle_create(&api, path, syntax, expires, password, burn),
        Action::Read { slug } => handle_read(&api, &slug),
        Action::Report { slug } => {
            api.send(api.client.post(api.url(&format!("p/{}/report", slug))?))?;
            eprintln!("Reported {}.", slug);
            Ok(())
        }
        Action::Delete { slug } => {
            api.send(api.client.delete(api.url(&format!("p/{}", slug))?))?;
            eprintln!("Deleted {}.", slug);
            Ok(())
        }
    }
}

struct Api {
    client: Client,
    base: Url,
}

impl Api {
    fn new(mut server: Url) -> Result<Self> {
        server.set_fragment(None);
        server.set_query(None);
        let base = server
            .join(&format!("{}/", API_ENDPOINT))
            .context("Invalid server URL")?;
        Ok(Self {
            client: Client::new(),
            base,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| anyhow!("Failed to build request URL: {}", e))
    }

    /// Sends the request and turns API errors into readable failures.
    fn send(&self, request: RequestBuilder) -> Result<Response> {
        let res = request.send().context("Request to server failed")?;
        if res.status().is_success() {
            return Ok(res);
        }

        let status = res.status();
        match res.json::<ErrorBody>() {
            Ok(body) => Err(ApiFailure { status, body }.into()),
            Err(_) => bail!("Got bad response from server: {}", status),
        }
    }
}

#[derive(Debug)]
struct ApiFailure {
    status: StatusCode,
    body: ErrorBody,
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.body.error, self.status)
    }
}

impl std::error::Error for ApiFailure {}

fn handle_create(
    api: &Api,
    path: Option<PathBuf>,
    syntax: Option<String>,
    expires_in: ExpiresIn,
    password: bool,
    burn_after_read: bool,
) -> Result<()> {
    let content = if let Some(path) = path {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        if atty::is(Stream::Stdin) {
            bail!("Nothing to upload. Pass a file or pipe content into stdin.");
        }
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    };

    let password = if password {
        Some(prompt_password("Please set the password for this paste: ")?)
    } else {
        None
    };

    let request = CreatePaste {
        content: Some(content),
        syntax,
        expires_in,
        password,
        burn_after_read,
    };

    let created: Created = api
        .send(api.client.post(api.url("paste")?).json(&request))?
        .json()
        .context("Server sent an unexpected response")?;

    println!("{}", created.slug);
    Ok(())
}

fn handle_read(api: &Api, slug: &str) -> Result<()> {
    let url = api.url(&format!("p/{}", slug))?;

    let res = match api.send(api.client.get(url.clone())) {
        Err(e) if is_password_required(&e) => {
            // Only print prompt on interactive, else it messes with output
            let password = prompt_password("Please enter the password to access this paste: ")?;
            api.send(
                api.client
                    .get(url)
                    .header(PASSWORD_HEADER_NAME.as_str(), password),
            )?
        }
        other => other?,
    };

    let paste: PasteView = res.json().context("Server sent an unexpected response")?;

    let mut stdout = std::io::stdout();
    stdout.write_all(paste.content.as_bytes())?;
    if atty::is(Stream::Stdout) && !paste.content.ends_with('\n') {
        writeln!(stdout)?;
    }

    eprintln!("{}", paste.expiration_text());

    Ok(())
}

fn is_password_required(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ApiFailure>()
        .is_some_and(|failure| failure.body.code == ErrorCode::PasswordRequired)
}
