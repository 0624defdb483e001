// ---------------------------------------------------------------------------
// Bundled rule table
// ---------------------------------------------------------------------------
//
// A curated set of high-signal checks for commonly exposed services. Rules are
// evaluated in table order, which fixes the order of emitted findings.

use std::sync::LazyLock;

use vigil_types::Severity;

/// Version constraint applied to the token following the rule's product name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionBound {
    /// Any version, or none at all.
    Any,
    /// Detected version is one of these exactly.
    Exact(&'static [&'static str]),
    /// `start <= detected < end`; either side may be open.
    Range {
        start: Option<&'static str>,
        end: Option<&'static str>,
    },
}

/// One known-vulnerable pattern.
#[derive(Debug, Clone)]
pub struct VulnRule {
    /// Stable identifier, used as the finding type.
    pub id: &'static str,
    /// Service names (as reported by the scanner) the rule applies to.
    pub services: &'static [&'static str],
    /// Ports the rule applies to regardless of the reported service name.
    pub ports: &'static [u16],
    /// Product keyword that must appear in the version text. Required when
    /// `version` is not [`VersionBound::Any`].
    pub product: Option<&'static str>,
    pub version: VersionBound,
    pub severity: Severity,
    pub confidence: u8,
    pub title: &'static str,
    pub description: &'static str,
    pub cves: &'static [&'static str],
    pub remediation: &'static str,
    pub tags: &'static [&'static str],
}

static RULES: LazyLock<Vec<VulnRule>> = LazyLock::new(build_rules);

/// The bundled rule table.
pub fn bundled_rules() -> &'static [VulnRule] {
    &RULES
}

fn build_rules() -> Vec<VulnRule> {
    vec![
        // -------------------------------------------------------------------
        // Web servers
        // -------------------------------------------------------------------
        VulnRule {
            id: "apache-path-traversal",
            services: &["http", "https", "http-proxy", "ssl/http"],
            ports: &[],
            product: Some("apache"),
            version: VersionBound::Exact(&["2.4.49", "2.4.50"]),
            severity: Severity::Critical,
            confidence: 95,
            title: "Apache HTTP Server path traversal and RCE",
            description: "Apache httpd 2.4.49 and 2.4.50 map URLs outside the document \
                          root, allowing file disclosure and, with CGI enabled, remote \
                          code execution.",
            cves: &["CVE-2021-41773", "CVE-2021-42013"],
            remediation: "Upgrade Apache httpd to 2.4.51 or later.",
            tags: &["web", "rce", "path-traversal"],
        },
        with_range(
            "apache-end-of-life",
            &["http", "https", "http-proxy", "ssl/http"],
            "apache",
            None,
            Some("2.4"),
            Severity::High,
            85,
            "End-of-life Apache HTTP Server",
            "Apache httpd releases before 2.4 no longer receive security fixes and \
             carry multiple known memory-safety flaws.",
            &["CVE-2017-7679", "CVE-2017-3167"],
            "Upgrade to a supported Apache httpd 2.4 release.",
            &["web", "eol"],
        ),
        with_range(
            "nginx-resolver-overwrite",
            &["http", "https", "http-proxy", "ssl/http"],
            "nginx",
            Some("0.6.18"),
            Some("1.20.1"),
            Severity::Medium,
            70,
            "nginx DNS resolver off-by-one",
            "nginx before 1.20.1 can overwrite one byte of memory when the resolver \
             processes a crafted DNS response.",
            &["CVE-2021-23017"],
            "Upgrade nginx to 1.20.1 or later.",
            &["web", "dns"],
        ),
        // -------------------------------------------------------------------
        // OpenSSH
        // -------------------------------------------------------------------
        with_range(
            "ssh-end-of-life",
            &["ssh"],
            "openssh",
            None,
            Some("7.0"),
            Severity::Critical,
            90,
            "End-of-life OpenSSH daemon",
            "OpenSSH releases before 7.0 are unsupported and expose client memory \
             disclosure via roaming and user enumeration through timing.",
            &["CVE-2016-0777", "CVE-2016-0778", "CVE-2016-6210"],
            "Upgrade OpenSSH to a supported release and disable legacy options.",
            &["ssh", "eol"],
        ),
        with_range(
            "ssh-user-enumeration",
            &["ssh"],
            "openssh",
            Some("7.0"),
            Some("7.8"),
            Severity::Medium,
            80,
            "OpenSSH username enumeration",
            "OpenSSH through 7.7 answers differently for valid and invalid users \
             when sent a malformed authentication request.",
            &["CVE-2018-15473"],
            "Upgrade OpenSSH to 7.8 or later.",
            &["ssh", "enumeration"],
        ),
        // -------------------------------------------------------------------
        // File sharing
        // -------------------------------------------------------------------
        exposure(
            "smb-exposed",
            &["microsoft-ds", "netbios-ssn", "smb"],
            &[139, 445],
            Severity::High,
            60,
            "SMB/NetBIOS service exposed",
            "File-sharing services reachable from the scanning position are a common \
             wormable entry point on unpatched Windows hosts.",
            &["CVE-2017-0144"],
            "Block ports 139 and 445 at the perimeter and disable SMBv1.",
            &["smb", "lateral-movement"],
        ),
        VulnRule {
            id: "vsftpd-backdoor",
            services: &["ftp"],
            ports: &[],
            product: Some("vsftpd"),
            version: VersionBound::Exact(&["2.3.4"]),
            severity: Severity::Critical,
            confidence: 95,
            title: "vsftpd 2.3.4 backdoor",
            description: "The vsftpd 2.3.4 source archive was trojaned to open a root \
                          shell on port 6200 when a username ends in ':)'.",
            cves: &["CVE-2011-2523"],
            remediation: "Replace the vsftpd binary with a verified build from a trusted source.",
            tags: &["ftp", "backdoor"],
        },
        exposure(
            "ftp-cleartext",
            &["ftp"],
            &[21],
            Severity::Medium,
            75,
            "Unencrypted FTP service",
            "FTP sends credentials and file contents in cleartext.",
            &[],
            "Replace FTP with SFTP or FTPS.",
            &["ftp", "cleartext"],
        ),
        // -------------------------------------------------------------------
        // Remote access
        // -------------------------------------------------------------------
        exposure(
            "telnet-cleartext",
            &["telnet"],
            &[23],
            Severity::High,
            85,
            "Telnet service exposed",
            "Telnet provides remote shell access with cleartext credentials.",
            &[],
            "Disable telnet and use SSH.",
            &["telnet", "cleartext"],
        ),
        exposure(
            "rdp-exposed",
            &["ms-wbt-server", "rdp"],
            &[3389],
            Severity::Medium,
            50,
            "Remote Desktop exposed",
            "Internet-facing RDP attracts credential stuffing and has had pre-auth \
             remote code execution flaws.",
            &["CVE-2019-0708"],
            "Put RDP behind a VPN or gateway and enforce network level authentication.",
            &["rdp", "remote-access"],
        ),
        // -------------------------------------------------------------------
        // Data stores
        // -------------------------------------------------------------------
        exposure(
            "database-exposed",
            &["mysql", "postgresql", "ms-sql-s", "mongodb", "redis"],
            &[1433, 3306, 5432, 6379, 27017],
            Severity::Medium,
            60,
            "Database service exposed",
            "Database listeners reachable from the network allow brute force and \
             exploitation of engine vulnerabilities.",
            &[],
            "Bind the database to private interfaces and restrict access by firewall.",
            &["database"],
        ),
    ]
}

// Helper: a product rule bounded by a version range.
#[allow(clippy::too_many_arguments)]
fn with_range(
    id: &'static str,
    services: &'static [&'static str],
    product: &'static str,
    start: Option<&'static str>,
    end: Option<&'static str>,
    severity: Severity,
    confidence: u8,
    title: &'static str,
    description: &'static str,
    cves: &'static [&'static str],
    remediation: &'static str,
    tags: &'static [&'static str],
) -> VulnRule {
    VulnRule {
        id,
        services,
        ports: &[],
        product: Some(product),
        version: VersionBound::Range { start, end },
        severity,
        confidence,
        title,
        description,
        cves,
        remediation,
        tags,
    }
}

// Helper: a rule that fires on the presence of a service, any version.
#[allow(clippy::too_many_arguments)]
fn exposure(
    id: &'static str,
    services: &'static [&'static str],
    ports: &'static [u16],
    severity: Severity,
    confidence: u8,
    title: &'static str,
    description: &'static str,
    cves: &'static [&'static str],
    remediation: &'static str,
    tags: &'static [&'static str],
) -> VulnRule {
    VulnRule {
        id,
        services,
        ports,
        product: None,
        version: VersionBound::Any,
        severity,
        confidence,
        title,
        description,
        cves,
        remediation,
        tags,
    }
}
