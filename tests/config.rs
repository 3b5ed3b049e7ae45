//! Validation table for the declarative configuration. Each case pins the
//! exact positional message an operator sees.

use credrotate::Config;

struct Case {
    description: &'static str,
    config: &'static str,
    expected: &'static str,
}

#[test]
fn validation_messages() {
    let cases = vec![
        Case {
            description: "a complete config validates",
            config: "
version: 1
namespace: cloudops
stores:
  - type: secretsmanager
    config:
      secret_template: \"/concourse/{{ .Namespace }}/{{ .Name }}\"
requests:
  - type: aws:sts
    store: secretsmanager
    credentials:
      - name: open-source-dev-read-only
        role_arn: arn:aws:iam::role/role-name
        duration: 900
",
            expected: "",
        },
        Case {
            description: "wrong version",
            config: "
version: 2
namespace: cloudops
",
            expected: "invalid configuration version: 2",
        },
        Case {
            description: "missing namespace",
            config: "
version: 1
",
            expected: "\"namespace\" must be defined",
        },
        Case {
            description: "duplicate store alias",
            config: "
version: 1
namespace: cloudops
stores:
  - type: secretsmanager
    alias: x
  - type: ssm
    alias: x
",
            expected: "stores[1]: duplicate alias \"x\"",
        },
        Case {
            description: "an aliased store is not reachable by its type tag",
            config: "
version: 1
namespace: cloudops
stores:
  - type: secretsmanager
    alias: concourse
    config:
      secret_template: \"/concourse/{{ .Namespace }}/{{ .Name }}\"
requests:
  - type: aws:sts
    store: secretsmanager
    credentials:
      - name: open-source-dev-read-only
        role_arn: arn:aws:iam::role/role-name
        duration: 900
",
            expected: "requests[0]: invalid store alias: \"secretsmanager\"",
        },
        Case {
            description: "duplicate credential names within a request",
            config: "
version: 1
namespace: cloudops
stores:
  - type: secretsmanager
    config:
      secret_template: \"/concourse/{{ .Namespace }}/{{ .Name }}\"
requests:
  - type: aws:sts
    store: secretsmanager
    credentials:
      - name: open-source-dev-read-only
        config:
          role_arn: arn:aws:iam::role/role-name
          duration: 900
      - name: open-source-dev-read-only
        config:
          role_arn: arn:aws:iam::role/role-name
          duration: 900
",
            expected:
                "requests[0]: invalid request: credentials[1]: duplicate name \"open-source-dev-read-only\"",
        },
        Case {
            description: "duplicate (type, store) requests",
            config: "
version: 1
namespace: cloudops
stores:
  - type: secretsmanager
    alias: concourse
    config:
      template: \"/concourse/{{ .Namespace }}/{{ .Name }}\"
requests:
  - store: concourse
    type: aws:sts
    credentials:
      - name: open-source-dev-read-only
        role_arn: arn:aws:iam::role/role-arn
        duration: 900
  - store: concourse
    type: aws:sts
    credentials:
      - name: open-source-dev-read-only
        role_arn: arn:aws:iam::role/role-arn
        duration: 900
",
            expected: "requests[1]: duplicate request: {Type:aws:sts Store:concourse}",
        },
        Case {
            description: "unknown credential type on a request group",
            config: "
version: 1
namespace: cloudops
stores:
  - type: inprocess
requests:
  - type: vault:token
    store: inprocess
    credentials:
      - name: some-credential
",
            expected: "requests[0]: unknown type: vault:token",
        },
        Case {
            description: "unknown credential type on an entry",
            config: "
version: 1
namespace: cloudops
stores:
  - type: inprocess
requests:
  - store: inprocess
    credentials:
      - name: some-credential
        type: vault:token
",
            expected: "requests[0]: invalid request: credentials[0]: unknown type: vault:token",
        },
        Case {
            description: "missing store on a request",
            config: "
version: 1
namespace: cloudops
stores:
  - type: inprocess
requests:
  - type: random
    credentials:
      - name: some-credential
",
            expected: "requests[0]: invalid request: \"store\" must be defined",
        },
        Case {
            description: "missing credential name",
            config: "
version: 1
namespace: cloudops
stores:
  - type: inprocess
requests:
  - type: random
    store: inprocess
    credentials:
      - length: 10
",
            expected: "requests[0]: invalid request: credentials[0]: \"name\" must be defined",
        },
    ];

    for case in cases {
        let config: Config = serde_yaml::from_str(case.config)
            .unwrap_or_else(|e| panic!("{}: config parses: {e}", case.description));
        let actual = match config.validate() {
            Ok(()) => String::new(),
            Err(e) => e.to_string(),
        };
        assert_eq!(actual, case.expected, "{}", case.description);
    }
}
