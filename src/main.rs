mod config;
mod errors;
mod files;
mod fzf;
mod history;
mod kube;
mod kubeconfig;
mod switch;

use std::env;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::debug;

use crate::config::Config;
use crate::fzf::Fzf;
use crate::history::{Category, History};
use crate::kube::KubeLister;
use crate::kubeconfig::KubeConfigStore;
use crate::switch::{SelectionRequest, Switcher};

/// Hop between kubernetes contexts and namespaces.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Kubeconfig search list separated by ':', overrides $KUBECONFIG. Later
    /// files win, only the last one is written.
    #[clap(long, global = true)]
    kubeconfig: Option<String>,

    /// Log level, one of error, warn, info, debug, trace.
    #[clap(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Switch context, then optionally namespace. Use `-` to go back to the
    /// previous one.
    Ctx {
        /// Part of the context name, or `-`.
        context: Option<String>,

        /// Part of the namespace name, or `-`.
        namespace: Option<String>,

        /// Require names to equal the query.
        #[clap(long, short)]
        exact: bool,
    },

    /// Switch namespace of the current context. Use `-` to go back to the
    /// previous one.
    Ns {
        /// Part of the namespace name, or `-`.
        namespace: Option<String>,

        /// Require names to equal the query.
        #[clap(long, short)]
        exact: bool,
    },

    /// Show the current context and namespace.
    Current,

    /// List contexts, the current one is marked with `*`.
    List,
}

impl Args {
    async fn run(&self, cfg: &Config) -> Result<()> {
        let paths = cfg
            .kubeconfig_paths(self.kubeconfig.as_deref(), env::var_os("KUBECONFIG"))
            .context("resolve kubeconfig paths")?;
        debug!("Kubeconfig search list: {paths:?}");
        let mut kubeconfig = KubeConfigStore::load(&paths).context("load kubeconfig")?;
        debug!("Primary kubeconfig: '{}'", kubeconfig.path().display());

        match &self.command {
            Commands::Ctx {
                context,
                namespace,
                exact,
            } => {
                let mut requests = vec![SelectionRequest::new(
                    Category::Context,
                    context.clone(),
                    *exact,
                )];
                if namespace.is_some() {
                    requests.push(SelectionRequest::new(
                        Category::Namespace,
                        namespace.clone(),
                        *exact,
                    ));
                }
                self.run_switch(cfg, &mut kubeconfig, requests).await
            }
            Commands::Ns { namespace, exact } => {
                let requests = vec![SelectionRequest::new(
                    Category::Namespace,
                    namespace.clone(),
                    *exact,
                )];
                self.run_switch(cfg, &mut kubeconfig, requests).await
            }
            Commands::Current => self.run_current(&kubeconfig),
            Commands::List => self.run_list(&kubeconfig),
        }
    }

    async fn run_switch(
        &self,
        cfg: &Config,
        kubeconfig: &mut KubeConfigStore,
        requests: Vec<SelectionRequest>,
    ) -> Result<()> {
        let mut history = History::load(&cfg.history_options()).context("load history")?;
        debug!("History file: '{}'", history.path().display());
        let fzf = Fzf::new(cfg.fzf.exec.as_str(), cfg.fzf.prompt_suffix.as_str());
        let lister = KubeLister::new(cfg);

        let target = match requests.last().map(|req| req.category) {
            Some(Category::Namespace) => "namespace",
            _ => "context",
        };
        let outcome = Switcher::new(&fzf, &lister)
            .switch(kubeconfig, &mut history, &requests)
            .await
            .with_context(|| format!("switch {target}"))?;

        if let Some(err) = outcome.history_warning {
            let err = anyhow::Error::new(err);
            eprintln!("warning: writing history: {err:#}");
        }
        for (category, value) in outcome.applied {
            println!("Switched to {category} \"{value}\".");
        }
        Ok(())
    }

    fn run_current(&self, kubeconfig: &KubeConfigStore) -> Result<()> {
        let context = kubeconfig.current_context()?;
        let namespace = kubeconfig.current_namespace()?;
        println!("{context} -> {namespace}");
        Ok(())
    }

    fn run_list(&self, kubeconfig: &KubeConfigStore) -> Result<()> {
        let current = kubeconfig.current_context().ok();
        for name in kubeconfig.list_context_names() {
            if Some(name.as_str()) == current {
                println!("* {name}");
            } else {
                println!("  {name}");
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let cfg = Config::load().context("load config")?;
    debug!("Config path: {:?}", cfg.path);

    args.run(&cfg).await
}
