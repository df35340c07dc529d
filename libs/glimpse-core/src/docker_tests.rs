/// Integration tests against real toolchains and a real Docker daemon
///
/// These tests verify end-to-end behaviour of both strategies:
/// 1. Trivial programs produce the same output directly and pooled
/// 2. Compile errors carry the compiler's diagnostics
/// 3. Runaway programs hit the ceiling and their sandbox is replaced
/// 4. Input reaches the program on both paths
///
/// The direct-path tests need python3 / gcc on the host; pooled tests need
/// the `glimpse` image (or `DOCKER_IMAGE`) with all six toolchains.

#[cfg(test)]
mod docker_tests {
    use crate::docker::DockerRuntime;
    use crate::error::ErrorKind;
    use crate::executor::Orchestrator;
    use crate::pool::SandboxPool;
    use crate::registry::LanguageRegistry;
    use crate::submission::FsSubmissionStore;
    use glimpse_common::config::{Config, LimitSettings, PoolSettings};
    use std::sync::Arc;
    use std::time::Duration;

    const PROGRAMS: [(&str, &str); 6] = [
        ("py", "print('Hello, world!')"),
        ("js", "console.log('Hello, world!');"),
        ("c", "#include <stdio.h>\nint main() { printf(\"Hello, world!\\n\"); return 0; }"),
        (
            "cpp",
            "#include <iostream>\nint main() { std::cout << \"Hello, world!\" << std::endl; }",
        ),
        (
            "java",
            "public class Main { public static void main(String[] a) { System.out.println(\"Hello, world!\"); } }",
        ),
        (
            "go",
            "package main\nimport \"fmt\"\nfunc main() { fmt.Println(\"Hello, world!\") }",
        ),
    ];

    fn orchestrator(dir: &std::path::Path, limits: LimitSettings) -> Orchestrator {
        Orchestrator::new(
            LanguageRegistry::builtin(),
            Arc::new(FsSubmissionStore::new(dir)),
            limits,
        )
    }

    async fn docker_pool(capacity: usize) -> SandboxPool {
        let config = Config::from_env().expect("Failed to load config");
        let runtime = DockerRuntime::connect(config.sandbox, config.limits.max_output_bytes)
            .expect("Failed to connect to Docker");
        let pool = SandboxPool::new(
            Arc::new(runtime),
            PoolSettings {
                capacity,
                acquire_timeout: Duration::from_secs(120),
                provision_backoff: Duration::from_secs(1),
            },
        );
        pool.warm_up();
        pool
    }

    /// Test: Python hello world on the host
    #[tokio::test]
    #[ignore] // Requires python3 on the host
    async fn test_direct_python_hello_world() {
        let dir = tempfile::tempdir().unwrap();
        let result = orchestrator(dir.path(), LimitSettings::default())
            .execute("py", "print('Hello, world!')", None, None)
            .await
            .unwrap();

        let response = result.into_response();
        assert_eq!(response.output, "Hello, world!\n");
        assert_eq!(response.error, "");
        assert_eq!(response.info, "python3 --version");
    }

    /// Test: Reading one line of input on the host
    #[tokio::test]
    #[ignore] // Requires python3 on the host
    async fn test_direct_python_echoes_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = orchestrator(dir.path(), LimitSettings::default())
            .execute("py", "print(input())", Some("abc"), None)
            .await
            .unwrap();
        assert_eq!(result.stdout, "abc\n");
    }

    /// Test: Infinite loop hits the execute ceiling
    #[tokio::test]
    #[ignore] // Requires python3 on the host
    async fn test_direct_python_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let limits = LimitSettings {
            execute_timeout: Duration::from_secs(2),
            ..LimitSettings::default()
        };
        let result = orchestrator(dir.path(), limits)
            .execute("py", "while True: pass", None, None)
            .await
            .unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    }

    /// Test: C syntax error yields gcc's diagnostic
    #[tokio::test]
    #[ignore] // Requires gcc on the host
    async fn test_direct_c_compile_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = orchestrator(dir.path(), LimitSettings::default())
            .execute("c", "int main() { return 0 }", None, None)
            .await
            .unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::Compile));
        assert!(result.error.unwrap().to_string().contains("error"));
    }

    /// Test: Every language produces identical output directly and pooled
    #[tokio::test]
    #[ignore] // Requires Docker and all toolchains on the host
    async fn test_direct_and_pooled_output_match() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), LimitSettings::default());
        let pool = docker_pool(2).await;

        for (language, code) in PROGRAMS {
            let direct = orchestrator.execute(language, code, None, None).await.unwrap();
            let pooled = orchestrator
                .execute(language, code, None, Some(&pool))
                .await
                .unwrap();
            assert!(direct.is_success(), "{}: {:?}", language, direct.error);
            assert!(pooled.is_success(), "{}: {:?}", language, pooled.error);
            assert_eq!(direct.stdout, pooled.stdout, "output differs for {}", language);
        }

        pool.shutdown().await;
    }

    /// Test: Pooled input path through the attached stream
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_pooled_python_echoes_input() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), LimitSettings::default());
        let pool = docker_pool(1).await;

        let result = orchestrator
            .execute("py", "print(input())", Some("abc"), Some(&pool))
            .await
            .unwrap();
        assert_eq!(result.stdout, "abc\n");

        pool.shutdown().await;
    }

    /// Test: Pooled timeout destroys the sandbox and the pool refills
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_pooled_timeout_replaces_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let limits = LimitSettings {
            execute_timeout: Duration::from_secs(2),
            ..LimitSettings::default()
        };
        let orchestrator = orchestrator(dir.path(), limits);
        let pool = docker_pool(1).await;

        let result = orchestrator
            .execute("py", "while True: pass", None, Some(&pool))
            .await
            .unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));

        let mut refilled = false;
        for _ in 0..120 {
            if pool.stats().ready == 1 {
                refilled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert!(refilled, "pool did not refill: {:?}", pool.stats());

        pool.shutdown().await;
    }
}
