//! Files written by `ciflow init`.

/// The PyNotify CI workflow: four independent jobs on push / pull request
/// to `master`.
pub const DEFAULT_WORKFLOW_YAML: &str = r#"name: PyNotify CI

on:
  push:
    branches: [master]
  pull_request:
    branches: [master]

jobs:
  test:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        python-version: ["3.11"]
        django-version: ["4.2.*"]
    steps:
      - uses: actions/checkout@v4
      - uses: ./.github/workflows/setup
        with:
          python-version: ${{ matrix.python-version }}
          django-version: ${{ matrix.django-version }}
      - run: make test

  coverage:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - uses: ./.github/workflows/setup
      - run: make coverage
      - uses: coverallsapp/github-action@v2
        with:
          github-token: ${{ secrets.GITHUB_TOKEN }}
          path-to-lcov: coverage.lcov

  docs:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - uses: ./.github/workflows/setup
      - run: make docs

  lint:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - uses: ./.github/workflows/setup
      - run: make lint
"#;

/// Starter setup action. Installs into a job-local virtualenv and puts it on
/// `PATH` for the steps that follow.
pub const DEFAULT_SETUP_ACTION_YAML: &str = r#"name: Setup
description: Install Python, Django and the development dependencies
inputs:
  python-version:
    description: Python version to use
    required: false
    default: "3.11"
  django-version:
    description: Django version specifier
    required: false
    default: "4.2.*"
runs:
  using: composite
  steps:
    - name: Create virtualenv
      shell: bash
      run: |
        if command -v "python${{ inputs.python-version }}" >/dev/null 2>&1; then
          "python${{ inputs.python-version }}" -m venv .venv
        else
          python3 -m venv .venv
        fi
        echo "$PWD/.venv/bin" >> "$GITHUB_PATH"
    - name: Install dependencies
      shell: bash
      run: |
        .venv/bin/pip install --upgrade pip
        .venv/bin/pip install "django==${{ inputs.django-version }}"
        if [ -f requirements-dev.txt ]; then .venv/bin/pip install -r requirements-dev.txt; fi
        .venv/bin/pip install -e .
"#;
