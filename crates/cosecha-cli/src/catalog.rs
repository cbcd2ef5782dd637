//! Built-in report catalog

use crate::error::{CliError, CliResult};
use cosecha::{Output, ReportDefinition, Selector, Step, Target};
use serde::Serialize;
use std::time::Duration;

/// How long a report page may take to render its table
const TABLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Pause after "Generar" on pages with no better signal
const SETTLE_PAUSE: Duration = Duration::from_secs(5);

/// Which configured page a report starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Management summary page
    Direccion,
    /// Report page with export menus
    Reportes,
    /// KPI page
    Kpis,
}

impl Source {
    /// Environment variable holding the page URL
    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::Direccion => "DIRECCION_REPORTE_URL",
            Self::Reportes => "REPORTES_URL",
            Self::Kpis => "KPI_DESEMPENO_URL",
        }
    }
}

/// One catalog report
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    /// Name used on the command line
    pub name: &'static str,
    /// Prefix of persisted table files
    pub file_stem: &'static str,
    /// Page the report starts from
    pub source: Source,
    /// One-line description
    pub description: &'static str,
    build: fn(&str, &str) -> ReportDefinition,
}

impl CatalogEntry {
    /// Report definition starting at `url`
    #[must_use]
    pub fn definition(&self, url: &str) -> ReportDefinition {
        (self.build)(self.name, url)
    }

    /// "table" or "download"
    #[must_use]
    pub fn output_kind(&self) -> &'static str {
        match self.definition("").output {
            Output::Table { .. } => "table",
            Output::Download { .. } => "download",
        }
    }
}

/// Every report `cosechador run` knows, in run order
pub const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "direccion",
        file_stem: "ingresos",
        source: Source::Direccion,
        description: "Largest table on the management summary page",
        build: direccion,
    },
    CatalogEntry {
        name: "kpi-desempeno",
        file_stem: "kpi_desempeno",
        source: Source::Kpis,
        description: "KPI performance table by branch",
        build: kpi_desempeno,
    },
    CatalogEntry {
        name: "kpi-ventas-nuevos-socios",
        file_stem: "kpi_ventas_nuevos_socios",
        source: Source::Kpis,
        description: "KPI new member sales table by branch",
        build: kpi_ventas_nuevos_socios,
    },
    CatalogEntry {
        name: "corte-caja",
        file_stem: "corte_caja",
        source: Source::Reportes,
        description: "Cash closing workbook, membership tab",
        build: corte_caja,
    },
    CatalogEntry {
        name: "venta-total",
        file_stem: "venta_total",
        source: Source::Reportes,
        description: "Total sales workbook",
        build: venta_total,
    },
    CatalogEntry {
        name: "cargos-recurrentes",
        file_stem: "cargos_recurrentes",
        source: Source::Reportes,
        description: "Recurring charges workbook",
        build: cargos_recurrentes,
    },
];

/// Look up a report by name
#[must_use]
pub fn find(name: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.name == name)
}

/// Resolve `names` in catalog order; no names selects everything
pub fn select(names: &[String]) -> CliResult<Vec<&'static CatalogEntry>> {
    if let Some(unknown) = names.iter().find(|name| find(name).is_none()) {
        let known: Vec<&str> = CATALOG.iter().map(|entry| entry.name).collect();
        return Err(CliError::config(format!(
            "unknown report '{unknown}' (known: {})",
            known.join(", ")
        )));
    }
    Ok(CATALOG
        .iter()
        .filter(|entry| names.is_empty() || names.iter().any(|n| n == entry.name))
        .collect())
}

fn generate() -> Step {
    Step::Click {
        target: Target::button("Generar"),
    }
}

fn export_ready() -> Step {
    Step::WaitForSelector {
        selector: Selector::css_with_text("button", "Exportar"),
        timeout: TABLE_TIMEOUT,
    }
}

fn excel_download(file_name: &str, tab: Option<Target>, normalize: bool) -> Output {
    Output::Download {
        file_name: file_name.to_string(),
        tab,
        export: Target::button("Exportar"),
        menu: Target::menu_item("Excel"),
        normalize,
    }
}

fn sucursal_table() -> Output {
    Output::Table {
        required_column: Some("Sucursal".to_string()),
        timeout: TABLE_TIMEOUT,
    }
}

fn direccion(name: &str, url: &str) -> ReportDefinition {
    ReportDefinition::new(
        name,
        url,
        Output::Table {
            required_column: None,
            timeout: TABLE_TIMEOUT,
        },
    )
    .step(Step::WaitForSelector {
        selector: Selector::css("table"),
        timeout: TABLE_TIMEOUT,
    })
}

fn kpi_desempeno(name: &str, url: &str) -> ReportDefinition {
    ReportDefinition::new(name, url, sucursal_table())
        .step(Step::SelectReportType {
            option: "Desempeño".to_string(),
        })
        .step(generate())
}

fn kpi_ventas_nuevos_socios(name: &str, url: &str) -> ReportDefinition {
    ReportDefinition::new(name, url, sucursal_table())
        .step(Step::SelectReportType {
            option: "Ventas Nuevas Socios".to_string(),
        })
        .step(generate())
}

fn corte_caja(name: &str, url: &str) -> ReportDefinition {
    let tab = Target::tab(&["Membresía", "Membresia"]);
    ReportDefinition::new(name, url, excel_download("corte_caja.xlsx", Some(tab), true))
        .step(Step::SelectReportType {
            option: "Reporte Corte De Caja".to_string(),
        })
        .step(Step::FillMonthToDate)
        .step(generate())
        .step(Step::Pause {
            duration: SETTLE_PAUSE,
        })
        .step(export_ready())
}

fn venta_total(name: &str, url: &str) -> ReportDefinition {
    ReportDefinition::new(name, url, excel_download("venta_total.xlsx", None, true))
        .step(Step::SelectReportType {
            option: "Reporte Venta Total".to_string(),
        })
        .step(Step::FillMonthToDate)
        .step(generate())
        .step(Step::WaitLoadingCycle {
            indicator: Selector::text("Cargando..."),
        })
        .step(export_ready())
}

fn cargos_recurrentes(name: &str, url: &str) -> ReportDefinition {
    ReportDefinition::new(
        name,
        url,
        excel_download("cargos_recurrentes.xlsx", None, false),
    )
    .step(Step::SelectReportType {
        option: "Reporte Cargos Recurrentes".to_string(),
    })
    .step(Step::FillMonthToDate)
    .step(generate())
    .step(Step::Pause {
        duration: SETTLE_PAUSE,
    })
    .step(Step::WaitForRows {
        min: 1,
        timeout: Duration::from_secs(20),
        fatal: false,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = CATALOG.iter().map(|e| e.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CATALOG.len());
    }

    #[test]
    fn test_definitions_carry_name_and_url() {
        for entry in CATALOG {
            let report = entry.definition("https://example.test/page");
            assert_eq!(report.name, entry.name);
            assert_eq!(report.url, "https://example.test/page");
        }
    }

    #[test]
    fn test_output_kinds() {
        let kinds: Vec<_> = CATALOG.iter().map(CatalogEntry::output_kind).collect();
        assert_eq!(
            kinds,
            ["table", "table", "table", "download", "download", "download"]
        );
    }

    #[test]
    fn test_select_empty_means_all() {
        assert_eq!(select(&[]).unwrap().len(), CATALOG.len());
    }

    #[test]
    fn test_select_keeps_catalog_order() {
        let names = vec!["venta-total".to_string(), "direccion".to_string()];
        let selected: Vec<_> = select(&names).unwrap().iter().map(|e| e.name).collect();
        assert_eq!(selected, ["direccion", "venta-total"]);
    }

    #[test]
    fn test_select_rejects_unknown() {
        let err = select(&["ventas".to_string()]).unwrap_err().to_string();
        assert!(err.contains("unknown report 'ventas'"));
        assert!(err.contains("corte-caja"));
    }

    #[test]
    fn test_corte_caja_opens_membership_tab() {
        let report = find("corte-caja").unwrap().definition("u");
        let Output::Download { tab, normalize, file_name, .. } = report.output else {
            panic!("expected a download");
        };
        let tab = tab.unwrap();
        assert_eq!(tab.label, "Membresía");
        assert!(tab.strategies.len() >= 6);
        assert!(normalize);
        assert_eq!(file_name, "corte_caja.xlsx");
        assert_eq!(report.steps[1], Step::FillMonthToDate);
    }

    #[test]
    fn test_venta_total_waits_for_loading_cycle() {
        let report = find("venta-total").unwrap().definition("u");
        assert!(report
            .steps
            .iter()
            .any(|s| matches!(s, Step::WaitLoadingCycle { .. })));
    }

    #[test]
    fn test_cargos_rows_are_best_effort() {
        let report = find("cargos-recurrentes").unwrap().definition("u");
        assert!(report.steps.iter().any(|s| matches!(
            s,
            Step::WaitForRows { min: 1, fatal: false, .. }
        )));
        assert!(matches!(
            report.output,
            Output::Download { normalize: false, .. }
        ));
    }

    #[test]
    fn test_kpi_tables_need_sucursal() {
        for name in ["kpi-desempeno", "kpi-ventas-nuevos-socios"] {
            let report = find(name).unwrap().definition("u");
            assert!(matches!(
                report.output,
                Output::Table { required_column: Some(ref c), .. } if c == "Sucursal"
            ));
        }
    }

    #[test]
    fn test_env_vars() {
        assert_eq!(Source::Kpis.env_var(), "KPI_DESEMPENO_URL");
        assert_eq!(find("direccion").unwrap().source.env_var(), "DIRECCION_REPORTE_URL");
    }
}
