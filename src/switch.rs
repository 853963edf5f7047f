use log::{debug, warn};

use crate::errors::{Error, Result};
use crate::fzf::{MatchOptions, Matcher};
use crate::history::{Category, History};
use crate::kube::NamespaceLister;
use crate::kubeconfig::KubeConfigStore;

/// Query meaning "the previous selection" rather than a search.
pub const BACK_REFERENCE: &str = "-";

pub struct SelectionRequest {
    pub category: Category,
    /// `None` lets the user choose among every candidate.
    pub query: Option<String>,
    pub exact_match: bool,
}

impl SelectionRequest {
    pub fn new(category: Category, query: Option<String>, exact_match: bool) -> Self {
        SelectionRequest {
            category,
            query,
            exact_match,
        }
    }
}

#[derive(Debug)]
pub struct SwitchOutcome {
    /// Values applied, in request order.
    pub applied: Vec<(Category, String)>,

    /// The kubeconfig was written but the history could not be.
    pub history_warning: Option<Error>,
}

pub struct Switcher<'a, M, L> {
    matcher: &'a M,
    lister: &'a L,
}

impl<'a, M: Matcher, L: NamespaceLister> Switcher<'a, M, L> {
    pub fn new(matcher: &'a M, lister: &'a L) -> Self {
        Switcher { matcher, lister }
    }

    /// Resolve and apply every request in order, then persist.
    ///
    /// Nothing reaches the disk unless all requests were applied. The
    /// kubeconfig is written before the history: failing to write it is
    /// fatal and leaves the history file alone, failing to write the history
    /// afterwards only yields [`SwitchOutcome::history_warning`].
    pub async fn switch(
        &self,
        kubeconfig: &mut KubeConfigStore,
        history: &mut History,
        requests: &[SelectionRequest],
    ) -> Result<SwitchOutcome> {
        let mut applied = Vec::with_capacity(requests.len());
        for req in requests {
            let value = self.resolve(kubeconfig, history, req).await?;
            debug!("Resolved {} '{value}'", req.category);

            match req.category {
                Category::Context => kubeconfig.set_context(&value)?,
                Category::Namespace => kubeconfig.set_namespace(&value)?,
            }
            history.add(req.category, &value);
            applied.push((req.category, value));
        }

        kubeconfig.write()?;

        let history_warning = match history.write() {
            Ok(()) => None,
            Err(err) => {
                warn!("Write history failed: {err}");
                Some(err)
            }
        };

        Ok(SwitchOutcome {
            applied,
            history_warning,
        })
    }

    async fn resolve(
        &self,
        kubeconfig: &KubeConfigStore,
        history: &History,
        req: &SelectionRequest,
    ) -> Result<String> {
        let query = req.query.as_deref().unwrap_or("");
        if query == BACK_REFERENCE {
            return resolve_back_reference(kubeconfig, history, req.category);
        }

        let candidates = match req.category {
            Category::Context => kubeconfig.list_context_names(),
            Category::Namespace => {
                let context = kubeconfig.current_context()?;
                self.lister.list_namespaces(kubeconfig, context).await?
            }
        };

        let prompt = format!("Select {}", req.category);
        let opts = MatchOptions {
            exact_match: req.exact_match,
            sorted: true,
            multi: false,
            prompt: &prompt,
            query,
        };
        // Only one target is switched, extra matches are ignored.
        self.matcher
            .run(&candidates, &opts)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::SelectionAborted(format!("no {} selected", req.category)))
    }
}

/// Most recent history entry that differs from the active value, so that
/// going back twice returns to where we started.
fn resolve_back_reference(
    kubeconfig: &KubeConfigStore,
    history: &History,
    category: Category,
) -> Result<String> {
    let current = match category {
        Category::Context => kubeconfig.current_context().ok(),
        Category::Namespace => kubeconfig.current_namespace().ok(),
    };

    let mut depth = 1;
    loop {
        let value = history.get(category, depth)?;
        if Some(value) != current {
            debug!("Back to {category} '{value}' at history depth {depth}");
            return Ok(value.to_string());
        }
        depth += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;
    use crate::history::HistoryOptions;

    const KUBECONFIG: &str = r#"apiVersion: v1
kind: Config
clusters:
- name: prod
  cluster:
    server: https://prod.example.com
- name: staging
  cluster:
    server: https://staging.example.com
contexts:
- name: prod
  context:
    cluster: prod
    user: admin
- name: staging
  context:
    cluster: staging
    user: admin
    namespace: apps
current-context: staging
users:
- name: admin
  user:
    token: secret
"#;

    /// Substring matcher standing in for fzf.
    #[derive(Default)]
    struct FakeMatcher {
        calls: RefCell<Vec<(Vec<String>, String, bool)>>,
    }

    impl Matcher for FakeMatcher {
        fn run(&self, candidates: &[String], opts: &MatchOptions) -> Result<Vec<String>> {
            self.calls.borrow_mut().push((
                candidates.to_vec(),
                opts.query.to_string(),
                opts.exact_match,
            ));
            Ok(candidates
                .iter()
                .filter(|c| {
                    if opts.exact_match {
                        c.as_str() == opts.query
                    } else {
                        c.contains(opts.query)
                    }
                })
                .cloned()
                .collect())
        }
    }

    struct FakeLister {
        namespaces: Option<Vec<String>>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeLister {
        fn with(namespaces: &[&str]) -> FakeLister {
            FakeLister {
                namespaces: Some(namespaces.iter().map(|s| s.to_string()).collect()),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn failing() -> FakeLister {
            FakeLister {
                namespaces: None,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl NamespaceLister for FakeLister {
        async fn list_namespaces(
            &self,
            _kubeconfig: &KubeConfigStore,
            context: &str,
        ) -> Result<Vec<String>> {
            self.calls.borrow_mut().push(context.to_string());
            match self.namespaces.as_ref() {
                Some(namespaces) => Ok(namespaces.clone()),
                None => Err(Error::ListFailed {
                    context: context.to_string(),
                    source: "connection refused".into(),
                }),
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        kubeconfig_path: PathBuf,
        history_opts: HistoryOptions,
    }

    impl Fixture {
        fn new() -> Fixture {
            let dir = TempDir::new().unwrap();
            let kubeconfig_path = dir.path().join("kube").join("config");
            fs::create_dir_all(kubeconfig_path.parent().unwrap()).unwrap();
            fs::write(&kubeconfig_path, KUBECONFIG).unwrap();
            let history_opts = HistoryOptions {
                path: dir.path().join("history.yaml"),
                max_entries: 100,
            };
            Fixture {
                _dir: dir,
                kubeconfig_path,
                history_opts,
            }
        }

        fn with_history(self, content: &str) -> Fixture {
            fs::write(&self.history_opts.path, content).unwrap();
            self
        }

        fn stores(&self) -> (KubeConfigStore, History) {
            let kubeconfig = KubeConfigStore::load(&[self.kubeconfig_path.clone()]).unwrap();
            let history = History::load(&self.history_opts).unwrap();
            (kubeconfig, history)
        }

        fn kubeconfig_content(&self) -> String {
            fs::read_to_string(&self.kubeconfig_path).unwrap()
        }

        fn history_content(&self) -> Option<String> {
            fs::read_to_string(&self.history_opts.path).ok()
        }

        /// Put a directory where the history file should be written.
        fn block_history(&self) {
            fs::create_dir(&self.history_opts.path).unwrap();
        }
    }

    fn request(category: Category, query: &str) -> SelectionRequest {
        SelectionRequest::new(category, Some(query.to_string()), false)
    }

    #[tokio::test]
    async fn test_back_reference_without_history() {
        let fixture = Fixture::new();
        let (mut kubeconfig, mut history) = fixture.stores();
        let (matcher, lister) = (FakeMatcher::default(), FakeLister::with(&["default"]));
        let switcher = Switcher::new(&matcher, &lister);

        let err = switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[request(Category::Namespace, BACK_REFERENCE)],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientHistory {
                category: Category::Namespace,
                ..
            }
        ));

        assert_eq!(fixture.kubeconfig_content(), KUBECONFIG);
        assert!(fixture.history_content().is_none());
        assert!(matcher.calls.borrow().is_empty());
        assert!(lister.calls.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_switch_context_by_query() {
        let fixture = Fixture::new();
        let (mut kubeconfig, mut history) = fixture.stores();
        let (matcher, lister) = (FakeMatcher::default(), FakeLister::with(&[]));
        let switcher = Switcher::new(&matcher, &lister);

        let outcome = switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[request(Category::Context, "prod")],
            )
            .await
            .unwrap();

        assert_eq!(
            outcome.applied,
            [(Category::Context, String::from("prod"))]
        );
        assert!(outcome.history_warning.is_none());
        assert_eq!(
            matcher.calls.borrow()[0],
            (
                vec![String::from("prod"), String::from("staging")],
                String::from("prod"),
                false
            )
        );

        let (kubeconfig, history) = fixture.stores();
        assert_eq!(kubeconfig.current_context().unwrap(), "prod");
        assert_eq!(kubeconfig.current_namespace().unwrap(), "default");
        assert_eq!(history.entries(Category::Context), ["prod"]);
        assert!(history.entries(Category::Namespace).is_empty());
    }

    #[tokio::test]
    async fn test_switch_namespace_by_query() {
        let fixture = Fixture::new();
        let (mut kubeconfig, mut history) = fixture.stores();
        let (matcher, lister) = (
            FakeMatcher::default(),
            FakeLister::with(&["default", "kube-system", "web"]),
        );
        let switcher = Switcher::new(&matcher, &lister);

        let outcome = switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[request(Category::Namespace, "kube")],
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.applied,
            [(Category::Namespace, String::from("kube-system"))]
        );
        assert_eq!(lister.calls.borrow().as_slice(), ["staging"]);

        let (kubeconfig, history) = fixture.stores();
        assert_eq!(kubeconfig.current_context().unwrap(), "staging");
        assert_eq!(kubeconfig.current_namespace().unwrap(), "kube-system");
        assert_eq!(history.entries(Category::Namespace), ["kube-system"]);
    }

    #[tokio::test]
    async fn test_exact_match_flag_is_forwarded() {
        let fixture = Fixture::new();
        let (mut kubeconfig, mut history) = fixture.stores();
        let (matcher, lister) = (FakeMatcher::default(), FakeLister::with(&[]));
        let switcher = Switcher::new(&matcher, &lister);

        let req = SelectionRequest::new(Category::Context, Some(String::from("pro")), true);
        let err = switcher
            .switch(&mut kubeconfig, &mut history, &[req])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SelectionAborted(_)));
        assert_eq!(err.to_string(), "no context selected");
        assert!(matcher.calls.borrow()[0].2);
        assert_eq!(fixture.kubeconfig_content(), KUBECONFIG);
    }

    #[tokio::test]
    async fn test_no_match_writes_nothing() {
        let fixture = Fixture::new().with_history("namespace:\n- apps\n");
        let (mut kubeconfig, mut history) = fixture.stores();
        let (matcher, lister) = (FakeMatcher::default(), FakeLister::with(&["default"]));
        let switcher = Switcher::new(&matcher, &lister);

        let err = switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[request(Category::Namespace, "nothing-like-this")],
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no namespace selected");
        assert_eq!(fixture.kubeconfig_content(), KUBECONFIG);
        assert_eq!(
            fixture.history_content().as_deref(),
            Some("namespace:\n- apps\n")
        );
    }

    #[tokio::test]
    async fn test_back_reference_skips_active_value() {
        let fixture = Fixture::new().with_history("namespace:\n- apps\n- default\n");
        let (mut kubeconfig, mut history) = fixture.stores();
        assert_eq!(kubeconfig.current_namespace().unwrap(), "apps");
        let (matcher, lister) = (FakeMatcher::default(), FakeLister::with(&[]));
        let switcher = Switcher::new(&matcher, &lister);

        let outcome = switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[request(Category::Namespace, BACK_REFERENCE)],
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.applied,
            [(Category::Namespace, String::from("default"))]
        );
        assert!(matcher.calls.borrow().is_empty());
        assert!(lister.calls.borrow().is_empty());

        let (mut kubeconfig, mut history) = fixture.stores();
        assert_eq!(kubeconfig.current_namespace().unwrap(), "default");
        assert_eq!(history.entries(Category::Namespace), ["default", "apps"]);

        // Going back again returns to where we started.
        switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[request(Category::Namespace, BACK_REFERENCE)],
            )
            .await
            .unwrap();
        let (kubeconfig, _) = fixture.stores();
        assert_eq!(kubeconfig.current_namespace().unwrap(), "apps");
    }

    #[tokio::test]
    async fn test_back_reference_only_active_value() {
        let fixture = Fixture::new().with_history("context:\n- staging\n");
        let (mut kubeconfig, mut history) = fixture.stores();
        let (matcher, lister) = (FakeMatcher::default(), FakeLister::with(&[]));
        let switcher = Switcher::new(&matcher, &lister);

        let err = switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[request(Category::Context, BACK_REFERENCE)],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientHistory {
                category: Category::Context,
                depth: 2
            }
        ));
        assert_eq!(fixture.kubeconfig_content(), KUBECONFIG);
    }

    #[tokio::test]
    async fn test_kubeconfig_write_failure_keeps_history() {
        let history_content = "context:\n- staging\n";
        let fixture = Fixture::new().with_history(history_content);
        let (mut kubeconfig, mut history) = fixture.stores();

        // Replace the kubeconfig directory with a plain file after loading.
        let kube_dir = fixture.kubeconfig_path.parent().unwrap();
        fs::remove_dir_all(kube_dir).unwrap();
        fs::write(kube_dir, "").unwrap();

        let (matcher, lister) = (FakeMatcher::default(), FakeLister::with(&[]));
        let switcher = Switcher::new(&matcher, &lister);
        let err = switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[request(Category::Context, "prod")],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::WriteFailed { .. }));
        assert_eq!(fixture.history_content().as_deref(), Some(history_content));
    }

    #[tokio::test]
    async fn test_history_write_failure_is_warning() {
        let fixture = Fixture::new();
        let (mut kubeconfig, mut history) = fixture.stores();
        fixture.block_history();
        let (matcher, lister) = (FakeMatcher::default(), FakeLister::with(&[]));
        let switcher = Switcher::new(&matcher, &lister);

        let outcome = switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[request(Category::Context, "prod")],
            )
            .await
            .unwrap();

        assert_eq!(
            outcome.applied,
            [(Category::Context, String::from("prod"))]
        );
        assert!(matches!(
            outcome.history_warning,
            Some(Error::WriteFailed { .. })
        ));

        let kubeconfig = KubeConfigStore::load(&[fixture.kubeconfig_path.clone()]).unwrap();
        assert_eq!(kubeconfig.current_context().unwrap(), "prod");
    }

    #[tokio::test]
    async fn test_switch_context_and_namespace() {
        let fixture = Fixture::new();
        let (mut kubeconfig, mut history) = fixture.stores();
        let (matcher, lister) = (FakeMatcher::default(), FakeLister::with(&["default", "web"]));
        let switcher = Switcher::new(&matcher, &lister);

        let outcome = switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[
                    request(Category::Context, "prod"),
                    request(Category::Namespace, "web"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.applied,
            [
                (Category::Context, String::from("prod")),
                (Category::Namespace, String::from("web"))
            ]
        );
        // Namespaces are listed for the newly selected context.
        assert_eq!(lister.calls.borrow().as_slice(), ["prod"]);

        let (kubeconfig, history) = fixture.stores();
        assert_eq!(kubeconfig.current_context().unwrap(), "prod");
        assert_eq!(kubeconfig.current_namespace().unwrap(), "web");
        assert_eq!(history.entries(Category::Context), ["prod"]);
        assert_eq!(history.entries(Category::Namespace), ["web"]);
    }

    #[tokio::test]
    async fn test_namespace_failure_discards_context_switch() {
        let fixture = Fixture::new();
        let (mut kubeconfig, mut history) = fixture.stores();
        let (matcher, lister) = (FakeMatcher::default(), FakeLister::failing());
        let switcher = Switcher::new(&matcher, &lister);

        let err = switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[
                    request(Category::Context, "prod"),
                    request(Category::Namespace, "web"),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ListFailed { ref context, .. } if context == "prod"));
        assert_eq!(fixture.kubeconfig_content(), KUBECONFIG);
        assert!(fixture.history_content().is_none());
    }

    #[tokio::test]
    async fn test_namespace_requires_current_context() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "contexts:\n- name: a\n  context: {}\n").unwrap();
        let mut kubeconfig = KubeConfigStore::load(&[path]).unwrap();
        let mut history = History::load(&HistoryOptions {
            path: dir.path().join("history.yaml"),
            max_entries: 100,
        })
        .unwrap();

        let (matcher, lister) = (FakeMatcher::default(), FakeLister::with(&["default"]));
        let switcher = Switcher::new(&matcher, &lister);
        let err = switcher
            .switch(
                &mut kubeconfig,
                &mut history,
                &[request(Category::Namespace, "default")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoCurrentContext));
        assert!(lister.calls.borrow().is_empty());
    }
}
